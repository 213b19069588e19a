//! Memory maps and the memory object of a state.
//!
//! Content is kept as concrete bytes per map. Memory that may hold symbolic bytes
//! (`MemoryKind::Symbolic`) additionally keeps a sparse address -> byte expression map
//! that shadows the concrete byte at that address.

use std::fmt;
use std::rc::Rc;

use bitflags::bitflags;
use byteorder::{ByteOrder, LittleEndian};
use fxhash::FxHashMap;
use smallvec::SmallVec;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::expr::expr_helpers::byte;
use crate::expr::{Expr, Sort};
use crate::Error;

bitflags! {
    #[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
    #[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
    pub struct Permissions: u8 {
        const READ = 0x1;
        const WRITE = 0x2;
        const EXEC = 0x4;
    }
}

impl fmt::Display for Permissions {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let flag = |bit, c| if self.contains(bit) { c } else { '-' };
        write!(
            f,
            "{}{}{}",
            flag(Permissions::READ, 'r'),
            flag(Permissions::WRITE, 'w'),
            flag(Permissions::EXEC, 'x'),
        )
    }
}

/// Contiguous region `[start, end)`.
#[derive(Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MemoryMap {
    name: String,
    perms: Permissions,
    start: u64,
    data: Vec<u8>,
}

impl MemoryMap {
    pub fn new(name: &str, perms: Permissions, start: u64, data: Vec<u8>) -> MemoryMap {
        MemoryMap {
            name: name.into(),
            perms,
            start,
            data,
        }
    }

    /// Zero-filled map of `size` bytes.
    pub fn zeroed(name: &str, perms: Permissions, start: u64, size: usize) -> MemoryMap {
        MemoryMap::new(name, perms, start, vec![0; size])
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn perms(&self) -> Permissions {
        self.perms
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    /// Saturates at `u64::MAX`; `Memory::map` only accepts maps whose end fits.
    pub fn end(&self) -> u64 {
        self.start.saturating_add(self.data.len() as u64)
    }

    pub fn contains(&self, address: u64) -> bool {
        address >= self.start && address < self.end()
    }

    /// Concrete bytes of `[start, end)`.
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    /// Name, permissions, start and end match.
    pub fn same_identity(&self, other: &MemoryMap) -> bool {
        self.name == other.name &&
            self.perms == other.perms &&
            self.start == other.start &&
            self.end() == other.end()
    }

    /// Total order used to line up maps of two memories.
    pub fn order_key(&self) -> (u64, u64, &str, Permissions) {
        (self.start, self.end(), &self.name, self.perms)
    }

    fn overlaps(&self, other: &MemoryMap) -> bool {
        self.start < other.end() && other.start < self.end()
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum MemoryKind {
    /// Every byte is concrete.
    Concrete,
    /// Bytes at these addresses are given by the expressions instead of the map data.
    Symbolic(FxHashMap<u64, Rc<Expr>>),
}

#[derive(Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Memory {
    /// Sorted by start, never overlapping.
    maps: Vec<MemoryMap>,
    kind: MemoryKind,
}

impl Memory {
    /// Concrete-only memory.
    pub fn new() -> Memory {
        Memory {
            maps: Vec::new(),
            kind: MemoryKind::Concrete,
        }
    }

    pub fn new_symbolic() -> Memory {
        Memory {
            maps: Vec::new(),
            kind: MemoryKind::Symbolic(FxHashMap::default()),
        }
    }

    pub fn kind(&self) -> &MemoryKind {
        &self.kind
    }

    pub fn is_symbolic(&self) -> bool {
        match self.kind {
            MemoryKind::Symbolic(_) => true,
            MemoryKind::Concrete => false,
        }
    }

    /// Adds a map. The map must be non-empty and `[start, end)` must be representable,
    /// so a map can't reach the last byte of the address space.
    pub fn map(&mut self, map: MemoryMap) -> Result<(), Error> {
        let size = map.data.len() as u64;
        if size == 0 || map.start.checked_add(size).is_none() {
            return Err(Error::InvalidMap(map.start, size));
        }
        if self.maps.iter().any(|x| x.overlaps(&map)) {
            return Err(Error::OverlappingMap(map.start, map.end()));
        }
        let pos = self.maps.binary_search_by_key(&map.start, |x| x.start)
            .unwrap_or_else(|x| x);
        self.maps.insert(pos, map);
        Ok(())
    }

    pub fn maps(&self) -> std::slice::Iter<'_, MemoryMap> {
        self.maps.iter()
    }

    fn map_index(&self, address: u64) -> Option<usize> {
        let pos = match self.maps.binary_search_by_key(&address, |x| x.start) {
            Ok(pos) => pos,
            Err(0) => return None,
            Err(pos) => pos - 1,
        };
        Some(pos).filter(|&pos| self.maps[pos].contains(address))
    }

    pub fn map_containing(&self, address: u64) -> Option<&MemoryMap> {
        self.map_index(address).map(|i| &self.maps[i])
    }

    /// Addresses that hold a symbolic byte. Empty for concrete memory.
    pub fn symbolic_addresses<'a>(&'a self) -> impl Iterator<Item = u64> + 'a {
        let symbols = match self.kind {
            MemoryKind::Symbolic(ref symbols) => Some(symbols),
            MemoryKind::Concrete => None,
        };
        symbols.into_iter().flat_map(|x| x.keys().copied())
    }

    /// Reads `size` byte expressions starting at `address`.
    pub fn read(&self, address: u64, size: usize) -> Result<SmallVec<[Rc<Expr>; 8]>, Error> {
        (0..size as u64)
            .map(|i| self.read_byte(address.wrapping_add(i)))
            .collect()
    }

    pub fn read_byte(&self, address: u64) -> Result<Rc<Expr>, Error> {
        if let MemoryKind::Symbolic(ref symbols) = self.kind {
            if let Some(value) = symbols.get(&address) {
                return Ok(value.clone());
            }
        }
        let map = self.map_containing(address).ok_or_else(|| Error::Unmapped(address))?;
        Ok(byte(map.data[(address - map.start) as usize]))
    }

    /// Writes 8-bit expressions. Constant bytes become concrete map data; other
    /// expressions need symbolic memory.
    pub fn write(&mut self, address: u64, values: &[Rc<Expr>]) -> Result<(), Error> {
        for (i, value) in values.iter().enumerate() {
            let address = address.wrapping_add(i as u64);
            if value.sort() != Sort::BitVec(8) {
                return Err(Error::SortMismatch(Sort::BitVec(8), value.sort()));
            }
            let index = self.map_index(address).ok_or_else(|| Error::Unmapped(address))?;
            match value.if_constant() {
                Some(c) => {
                    let map = &mut self.maps[index];
                    map.data[(address - map.start) as usize] = c as u8;
                    if let MemoryKind::Symbolic(ref mut symbols) = self.kind {
                        symbols.remove(&address);
                    }
                }
                None => match self.kind {
                    MemoryKind::Symbolic(ref mut symbols) => {
                        symbols.insert(address, value.clone());
                    }
                    MemoryKind::Concrete => return Err(Error::SymbolicWriteToConcrete(address)),
                },
            }
        }
        Ok(())
    }

    pub fn write_bytes(&mut self, address: u64, values: &[u8]) -> Result<(), Error> {
        let exprs = values.iter().map(|&x| byte(x)).collect::<SmallVec<[_; 8]>>();
        self.write(address, &exprs)
    }

    /// Returns false if any of the bytes is symbolic.
    fn read_concrete(&self, address: u64, out: &mut [u8]) -> Result<bool, Error> {
        for (i, out) in out.iter_mut().enumerate() {
            match self.read_byte(address.wrapping_add(i as u64))?.if_constant() {
                Some(c) => *out = c as u8,
                None => return Ok(false),
            }
        }
        Ok(true)
    }

    /// Little-endian read, `None` if any of the bytes is symbolic.
    pub fn read_u32(&self, address: u64) -> Result<Option<u32>, Error> {
        let mut buf = [0u8; 4];
        match self.read_concrete(address, &mut buf)? {
            true => Ok(Some(LittleEndian::read_u32(&buf))),
            false => Ok(None),
        }
    }

    /// Little-endian read, `None` if any of the bytes is symbolic.
    pub fn read_u64(&self, address: u64) -> Result<Option<u64>, Error> {
        let mut buf = [0u8; 8];
        match self.read_concrete(address, &mut buf)? {
            true => Ok(Some(LittleEndian::read_u64(&buf))),
            false => Ok(None),
        }
    }

    pub fn write_u32(&mut self, address: u64, value: u32) -> Result<(), Error> {
        let mut buf = [0u8; 4];
        LittleEndian::write_u32(&mut buf, value);
        self.write_bytes(address, &buf)
    }

    pub fn write_u64(&mut self, address: u64, value: u64) -> Result<(), Error> {
        let mut buf = [0u8; 8];
        LittleEndian::write_u64(&mut buf, value);
        self.write_bytes(address, &buf)
    }
}

impl Default for Memory {
    fn default() -> Memory {
        Memory::new()
    }
}

#[test]
fn maps_stay_sorted_and_disjoint() {
    let mut mem = Memory::new();
    mem.map(MemoryMap::zeroed("stack", Permissions::READ | Permissions::WRITE, 0x7000, 0x1000))
        .unwrap();
    mem.map(MemoryMap::zeroed("text", Permissions::READ | Permissions::EXEC, 0x1000, 0x100))
        .unwrap();
    assert_eq!(
        mem.map(MemoryMap::zeroed("bad", Permissions::READ, 0x10f0, 0x20)),
        Err(Error::OverlappingMap(0x10f0, 0x1110)),
    );
    let starts = mem.maps().map(|x| x.start()).collect::<Vec<_>>();
    assert_eq!(starts, vec![0x1000, 0x7000]);
    assert_eq!(mem.map_containing(0x10ff).map(|x| x.name()), Some("text"));
    assert!(mem.map_containing(0x1100).is_none());
    assert!(mem.map_containing(0xfff).is_none());
    assert_eq!(mem.maps().next().unwrap().perms().to_string(), "r-x");
}

#[test]
fn maps_must_fit_address_space() {
    let mut mem = Memory::new();
    assert_eq!(
        mem.map(MemoryMap::zeroed("top", Permissions::READ, u64::MAX - 0xf, 0x10)),
        Err(Error::InvalidMap(u64::MAX - 0xf, 0x10)),
    );
    assert_eq!(
        mem.map(MemoryMap::zeroed("empty", Permissions::READ, 0x1000, 0)),
        Err(Error::InvalidMap(0x1000, 0)),
    );
    assert_eq!(mem.maps().count(), 0);
    assert_eq!(mem.read_byte(u64::MAX - 1), Err(Error::Unmapped(u64::MAX - 1)));

    mem.map(MemoryMap::zeroed("high", Permissions::READ, u64::MAX - 0x10, 0x10)).unwrap();
    assert_eq!(mem.map_containing(u64::MAX - 1).map(|x| x.end()), Some(u64::MAX));
    assert!(mem.map_containing(u64::MAX).is_none());
    assert_eq!(
        mem.map(MemoryMap::zeroed("next", Permissions::READ, u64::MAX - 8, 4)),
        Err(Error::OverlappingMap(u64::MAX - 8, u64::MAX - 4)),
    );
    // A map built past the end still reports a sane range
    let past = MemoryMap::zeroed("past", Permissions::READ, u64::MAX - 1, 4);
    assert_eq!(past.end(), u64::MAX);
}

#[test]
fn symbolic_bytes_shadow_concrete() {
    use crate::expr::expr_helpers::*;
    let mut mem = Memory::new_symbolic();
    mem.map(MemoryMap::zeroed("data", Permissions::READ | Permissions::WRITE, 0x2000, 0x10))
        .unwrap();
    mem.write_u32(0x2000, 0x4433_2211).unwrap();
    assert_eq!(mem.read_u32(0x2000), Ok(Some(0x4433_2211)));
    mem.write(0x2001, &[byte_var("s")]).unwrap();
    assert_eq!(mem.read_u32(0x2000), Ok(None));
    let read = mem.read(0x2000, 2).unwrap();
    assert_eq!(&read[..], &[byte(0x11), byte_var("s")][..]);
    assert_eq!(mem.symbolic_addresses().collect::<Vec<_>>(), vec![0x2001]);
    // Concrete write drops the symbol
    mem.write_bytes(0x2001, &[0x99]).unwrap();
    assert_eq!(mem.symbolic_addresses().count(), 0);
    assert_eq!(mem.read_u32(0x2000), Ok(Some(0x4433_9911)));
    assert_eq!(mem.read(0x200f, 2).unwrap_err(), Error::Unmapped(0x2010));
}

#[test]
fn concrete_memory_rejects_symbols() {
    use crate::expr::expr_helpers::*;
    let mut mem = Memory::new();
    mem.map(MemoryMap::zeroed("data", Permissions::READ, 0x2000, 0x10)).unwrap();
    assert_eq!(mem.write(0x2004, &[byte_var("s")]), Err(Error::SymbolicWriteToConcrete(0x2004)));
    assert_eq!(
        mem.write(0x2004, &[constval(1, 16)]),
        Err(Error::SortMismatch(Sort::BitVec(8), Sort::BitVec(16))),
    );
    assert_eq!(mem.symbolic_addresses().count(), 0);
    mem.write_u64(0x2008, 0x0102_0304_0506_0708).unwrap();
    assert_eq!(mem.read_u64(0x2008), Ok(Some(0x0102_0304_0506_0708)));
}
