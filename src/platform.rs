//! I/O history of a state: sockets, symbolic files and the syscall trace.
//!
//! Sockets are owned by a per-platform arena and link to their peer by id, so a
//! connected pair is just two sockets naming each other.

use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::expr::{Expr, Sort};
use crate::Error;

#[derive(Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SocketId(pub u32);

#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Socket {
    /// Bytes transmitted through the socket, in order.
    pub buffer: Vec<Rc<Expr>>,
    peer: Option<SocketId>,
}

impl Socket {
    pub fn peer(&self) -> Option<SocketId> {
        self.peer
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Sockets {
    sockets: Vec<Socket>,
}

impl Sockets {
    pub fn new() -> Sockets {
        Sockets {
            sockets: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.sockets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sockets.is_empty()
    }

    /// Adds an unconnected socket.
    ///
    /// Panics if there are already `u32::MAX + 1` sockets.
    pub fn add(&mut self) -> SocketId {
        assert!(self.sockets.len() <= u32::MAX as usize, "Too many sockets");
        let id = SocketId(self.sockets.len() as u32);
        self.sockets.push(Socket::default());
        id
    }

    /// Adds two sockets that are each other's peer.
    pub fn pair(&mut self) -> (SocketId, SocketId) {
        let a = self.add();
        let b = self.add();
        self.sockets[a.0 as usize].peer = Some(b);
        self.sockets[b.0 as usize].peer = Some(a);
        (a, b)
    }

    /// Sets the peer of `id` only; the peer's own link is left as is.
    pub fn set_peer(&mut self, id: SocketId, peer: Option<SocketId>) -> Result<(), Error> {
        if let Some(peer) = peer {
            self.check(peer)?;
        }
        self.get_mut(id)?.peer = peer;
        Ok(())
    }

    pub fn get(&self, id: SocketId) -> Option<SocketRef<'_>> {
        match (id.0 as usize) < self.sockets.len() {
            true => Some(SocketRef {
                sockets: self,
                id,
            }),
            false => None,
        }
    }

    pub fn get_mut(&mut self, id: SocketId) -> Result<&mut Socket, Error> {
        self.sockets.get_mut(id.0 as usize).ok_or_else(|| Error::InvalidSocket(id.0))
    }

    /// Appends 8-bit expressions to the socket's buffer.
    pub fn transmit(&mut self, id: SocketId, data: &[Rc<Expr>]) -> Result<(), Error> {
        check_bytes(data)?;
        self.get_mut(id)?.buffer.extend(data.iter().cloned());
        Ok(())
    }

    fn check(&self, id: SocketId) -> Result<(), Error> {
        self.get(id).map(|_| ()).ok_or_else(|| Error::InvalidSocket(id.0))
    }
}

fn check_bytes(data: &[Rc<Expr>]) -> Result<(), Error> {
    match data.iter().find(|x| x.sort() != Sort::BitVec(8)) {
        Some(bad) => Err(Error::SortMismatch(Sort::BitVec(8), bad.sort())),
        None => Ok(()),
    }
}

/// Borrowed view of a socket which can follow the peer link.
#[derive(Clone, Copy)]
pub struct SocketRef<'a> {
    sockets: &'a Sockets,
    id: SocketId,
}

impl<'a> SocketRef<'a> {
    pub fn id(&self) -> SocketId {
        self.id
    }

    pub fn socket(&self) -> &'a Socket {
        &self.sockets.sockets[self.id.0 as usize]
    }

    pub fn buffer(&self) -> &'a [Rc<Expr>] {
        &self.socket().buffer
    }

    pub fn peer(&self) -> Option<SocketRef<'a>> {
        self.socket().peer.and_then(|x| self.sockets.get(x))
    }
}

impl<'a> fmt::Debug for SocketRef<'a> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("SocketRef")
            .field("id", &self.id)
            .field("buffer", &self.buffer())
            .field("peer", &self.socket().peer)
            .finish()
    }
}

/// Content of a file opened with symbolic data.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SymbolicFile {
    pub data: Vec<Rc<Expr>>,
    pub offset: u64,
}

#[derive(Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Syscall {
    pub name: String,
    pub fd: i32,
    pub data: Vec<Rc<Expr>>,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Platform {
    sockets: Sockets,
    input: Option<SocketId>,
    output: Option<SocketId>,
    pub symbolic_files: BTreeMap<String, SymbolicFile>,
    pub syscall_trace: Vec<Syscall>,
}

impl Platform {
    /// No sockets, no files, empty trace.
    pub fn new() -> Platform {
        Platform::default()
    }

    /// Platform with unconnected input and output sockets.
    pub fn with_io() -> Platform {
        let mut platform = Platform::new();
        let input = platform.sockets.add();
        let output = platform.sockets.add();
        platform.input = Some(input);
        platform.output = Some(output);
        platform
    }

    pub fn sockets(&self) -> &Sockets {
        &self.sockets
    }

    pub fn sockets_mut(&mut self) -> &mut Sockets {
        &mut self.sockets
    }

    pub fn input(&self) -> Option<SocketRef<'_>> {
        self.input.and_then(|x| self.sockets.get(x))
    }

    pub fn output(&self) -> Option<SocketRef<'_>> {
        self.output.and_then(|x| self.sockets.get(x))
    }

    pub fn input_id(&self) -> Option<SocketId> {
        self.input
    }

    pub fn output_id(&self) -> Option<SocketId> {
        self.output
    }

    pub fn set_input(&mut self, id: Option<SocketId>) -> Result<(), Error> {
        if let Some(id) = id {
            self.sockets.check(id)?;
        }
        self.input = id;
        Ok(())
    }

    pub fn set_output(&mut self, id: Option<SocketId>) -> Result<(), Error> {
        if let Some(id) = id {
            self.sockets.check(id)?;
        }
        self.output = id;
        Ok(())
    }

    /// Adds or replaces the file at `path`. The content must be 8-bit expressions.
    pub fn add_symbolic_file(&mut self, path: &str, file: SymbolicFile) -> Result<(), Error> {
        check_bytes(&file.data)?;
        self.symbolic_files.insert(path.into(), file);
        Ok(())
    }

    /// Appends to the syscall trace. The data must be 8-bit expressions.
    pub fn record_syscall(
        &mut self,
        name: &str,
        fd: i32,
        data: Vec<Rc<Expr>>,
    ) -> Result<(), Error> {
        check_bytes(&data)?;
        self.syscall_trace.push(Syscall {
            name: name.into(),
            fd,
            data,
        });
        Ok(())
    }
}

#[test]
fn socket_pair_links_both_ways() {
    let mut sockets = Sockets::new();
    let (a, b) = sockets.pair();
    let a_ref = sockets.get(a).unwrap();
    assert_eq!(a_ref.peer().map(|x| x.id()), Some(b));
    assert_eq!(a_ref.peer().and_then(|x| x.peer()).map(|x| x.id()), Some(a));
    assert!(sockets.get(SocketId(2)).is_none());
    assert_eq!(sockets.set_peer(a, Some(SocketId(5))), Err(Error::InvalidSocket(5)));
    sockets.set_peer(a, None).unwrap();
    assert!(sockets.get(a).unwrap().peer().is_none());
    assert_eq!(sockets.get(b).unwrap().socket().peer(), Some(a));
}

#[test]
fn transmit_appends_bytes() {
    use crate::expr::expr_helpers::*;
    let mut platform = Platform::with_io();
    let out = platform.output_id().unwrap();
    platform.sockets_mut().transmit(out, &bytes(b"AB")).unwrap();
    platform.sockets_mut().transmit(out, &[byte_var("c")]).unwrap();
    assert_eq!(platform.output().unwrap().buffer().len(), 3);
    assert!(platform.input().unwrap().buffer().is_empty());
    assert_eq!(
        platform.sockets_mut().transmit(out, &[constval(1, 32)]),
        Err(Error::SortMismatch(Sort::BitVec(8), Sort::BitVec(32))),
    );
    assert_eq!(platform.set_output(Some(SocketId(9))), Err(Error::InvalidSocket(9)));
}

#[test]
fn trace_and_files_hold_bytes() {
    use crate::expr::expr_helpers::*;
    let mut platform = Platform::new();
    platform.record_syscall("write", 1, bytes(b"ok")).unwrap();
    assert_eq!(
        platform.record_syscall("write", 1, vec![byte(1), constval(2, 16)]),
        Err(Error::SortMismatch(Sort::BitVec(8), Sort::BitVec(16))),
    );
    assert_eq!(platform.syscall_trace.len(), 1);

    let file = SymbolicFile {
        data: vec![byte_var("f0"), var("wide", Sort::BitVec(32))],
        offset: 0,
    };
    assert_eq!(
        platform.add_symbolic_file("/tmp/input", file),
        Err(Error::SortMismatch(Sort::BitVec(8), Sort::BitVec(32))),
    );
    assert!(platform.symbolic_files.is_empty());
}
