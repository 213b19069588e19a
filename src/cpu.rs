//! Register layouts and register files.

use std::fmt;
use std::rc::Rc;

use fxhash::FxHashMap;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::expr::expr_helpers::{bool_const, constval};
use crate::expr::{Expr, Sort};
use crate::Error;

/// Index of a canonical register in a `RegisterLayout`.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Register(pub u16);

#[derive(Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RegisterDesc {
    pub name: String,
    /// `Sort::Bool` for single-bit registers (flags)
    pub sort: Sort,
}

/// The canonical registers of an architecture, in a fixed order.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RegisterLayout {
    registers: Vec<RegisterDesc>,
}

impl RegisterLayout {
    pub fn new() -> RegisterLayout {
        RegisterLayout {
            registers: Vec::new(),
        }
    }

    /// Adds a register of `width` bits, width 1 registers are booleans.
    ///
    /// Panics if `width` is not in 1..=64, or if the layout already has `u16::MAX + 1`
    /// registers.
    pub fn add(&mut self, name: &str, width: u8) -> Register {
        assert!(width >= 1 && width <= 64, "Invalid register width {}", width);
        assert!(self.registers.len() <= u16::MAX as usize, "Too many registers");
        let sort = match width {
            1 => Sort::Bool,
            x => Sort::BitVec(x),
        };
        let reg = Register(self.registers.len() as u16);
        self.registers.push(RegisterDesc {
            name: name.into(),
            sort,
        });
        reg
    }

    /// General purpose registers, `rip`, and the status/direction flags.
    pub fn x86_64() -> RegisterLayout {
        let mut layout = RegisterLayout::new();
        let names = [
            "rax", "rcx", "rdx", "rbx", "rsp", "rbp", "rsi", "rdi",
            "r8", "r9", "r10", "r11", "r12", "r13", "r14", "r15", "rip",
        ];
        for name in names.iter() {
            layout.add(name, 64);
        }
        for flag in ["cf", "pf", "af", "zf", "sf", "df", "of"].iter() {
            layout.add(flag, 1);
        }
        layout
    }

    pub fn len(&self) -> usize {
        self.registers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registers.is_empty()
    }

    /// Canonical registers in layout order.
    pub fn registers(&self) -> impl Iterator<Item = Register> {
        (0..self.registers.len() as u16).map(Register)
    }

    pub fn desc(&self, reg: Register) -> Option<&RegisterDesc> {
        self.registers.get(reg.0 as usize)
    }

    pub fn by_name(&self, name: &str) -> Option<Register> {
        self.registers.iter().position(|x| x.name == name).map(|x| Register(x as u16))
    }

    pub fn sort(&self, reg: Register) -> Result<Sort, Error> {
        self.desc(reg).map(|x| x.sort).ok_or_else(|| Error::UnknownRegister(reg.0))
    }
}

/// Current value of every register of a layout.
///
/// Registers start out as zero/false.
#[derive(Clone, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RegisterFile {
    layout: Rc<RegisterLayout>,
    values: FxHashMap<Register, Rc<Expr>>,
}

impl RegisterFile {
    pub fn new(layout: Rc<RegisterLayout>) -> RegisterFile {
        let values = layout.registers.iter().enumerate()
            .map(|(i, desc)| {
                let value = match desc.sort {
                    Sort::Bool => bool_const(false),
                    Sort::BitVec(width) => constval(0, width),
                };
                (Register(i as u16), value)
            })
            .collect();
        RegisterFile {
            layout,
            values,
        }
    }

    pub fn layout(&self) -> &Rc<RegisterLayout> {
        &self.layout
    }

    pub fn same_layout(&self, other: &RegisterFile) -> bool {
        Rc::ptr_eq(&self.layout, &other.layout) || *self.layout == *other.layout
    }

    pub fn canonical_registers(&self) -> impl Iterator<Item = Register> {
        self.layout.registers()
    }

    pub fn read(&self, reg: Register) -> Result<Rc<Expr>, Error> {
        self.values.get(&reg).cloned().ok_or_else(|| Error::UnknownRegister(reg.0))
    }

    /// The value has to have the register's declared sort.
    pub fn write(&mut self, reg: Register, value: Rc<Expr>) -> Result<(), Error> {
        let sort = self.layout.sort(reg)?;
        if value.sort() != sort {
            return Err(Error::SortMismatch(sort, value.sort()));
        }
        self.values.insert(reg, value);
        Ok(())
    }

    pub fn read_by_name(&self, name: &str) -> Option<Rc<Expr>> {
        let reg = self.layout.by_name(name)?;
        self.values.get(&reg).cloned()
    }
}

impl fmt::Debug for RegisterFile {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut map = f.debug_map();
        for (i, desc) in self.layout.registers.iter().enumerate() {
            if let Some(value) = self.values.get(&Register(i as u16)) {
                map.entry(&desc.name, value);
            }
        }
        map.finish()
    }
}

#[test]
fn x86_64_layout() {
    let layout = RegisterLayout::x86_64();
    assert_eq!(layout.len(), 24);
    let rax = layout.by_name("rax").unwrap();
    assert_eq!(rax, Register(0));
    assert_eq!(layout.sort(rax), Ok(Sort::BitVec(64)));
    let zf = layout.by_name("zf").unwrap();
    assert_eq!(layout.sort(zf), Ok(Sort::Bool));
    assert_eq!(layout.sort(Register(24)), Err(Error::UnknownRegister(24)));
}

#[test]
#[should_panic(expected = "Too many registers")]
fn register_indices_do_not_wrap() {
    let mut layout = RegisterLayout::new();
    for i in 0..=u16::MAX as u32 {
        let reg = layout.add("r", 8);
        assert_eq!(reg, Register(i as u16));
    }
    assert_eq!(layout.len(), 0x10000);
    layout.add("r", 8);
}

#[test]
fn write_checks_sort() {
    use crate::expr::expr_helpers::*;
    let layout = Rc::new(RegisterLayout::x86_64());
    let mut regs = RegisterFile::new(layout.clone());
    let rax = layout.by_name("rax").unwrap();
    let cf = layout.by_name("cf").unwrap();
    assert_eq!(regs.read(rax).unwrap(), constval(0, 64));
    assert_eq!(regs.read(cf).unwrap(), bool_const(false));
    regs.write(rax, var("x", Sort::BitVec(64))).unwrap();
    assert_eq!(regs.read_by_name("rax"), Some(var("x", Sort::BitVec(64))));
    assert_eq!(
        regs.write(rax, constval(1, 32)),
        Err(Error::SortMismatch(Sort::BitVec(64), Sort::BitVec(32))),
    );
    assert_eq!(
        regs.write(cf, constval(1, 1)),
        Err(Error::SortMismatch(Sort::Bool, Sort::BitVec(1))),
    );
    regs.write(cf, bool_const(true)).unwrap();
    assert_eq!(regs.write(Register(100), bool_const(true)), Err(Error::UnknownRegister(100)));
}
