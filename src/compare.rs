//! Equivalence checks between parts of two states.
//!
//! Every check takes the constraint set it is evaluated under and the solver
//! explicitly. Concrete data is compared directly, symbolic bytes are checked with
//! `Solver::must_be_true(constraints, a == b)`.

use std::hash::BuildHasherDefault;
use std::rc::Rc;

use fxhash::FxHasher;
use hashbrown::HashSet;

use crate::constraints::ConstraintSet;
use crate::expr::expr_helpers::expr_eq;
use crate::expr::Expr;
use crate::memory::{Memory, MemoryMap};
use crate::platform::{SocketId, SocketRef, Syscall};
use crate::solver::Solver;
use crate::Error;

/// Buffers are equal if they have the same length and every position must be equal.
pub fn compare_buffers<S: Solver + ?Sized>(
    solver: &S,
    constraints: &ConstraintSet,
    a: &[Rc<Expr>],
    b: &[Rc<Expr>],
) -> Result<bool, Error> {
    if a.len() != b.len() {
        return Ok(false);
    }
    for (i, (a, b)) in a.iter().zip(b.iter()).enumerate() {
        let cond = expr_eq(a.clone(), b.clone())?;
        if !solver.must_be_true(constraints, &cond) {
            trace!("Buffers differ at {}: {} / {}", i, a, b);
            return Ok(false);
        }
    }
    Ok(true)
}

/// Compares socket buffers, following the peer links of both sockets in lockstep.
///
/// Absent sockets are only equal to absent sockets. Once a pair of sockets has been
/// compared, reaching the same pair again through a peer cycle ends the walk as equal.
pub fn compare_sockets<S: Solver + ?Sized>(
    solver: &S,
    constraints: &ConstraintSet,
    a: Option<SocketRef<'_>>,
    b: Option<SocketRef<'_>>,
) -> Result<bool, Error> {
    let mut visited: HashSet<(SocketId, SocketId), BuildHasherDefault<FxHasher>> =
        HashSet::with_hasher(Default::default());
    let (mut a, mut b) = (a, b);
    loop {
        let (sock_a, sock_b) = match (a, b) {
            (None, None) => return Ok(true),
            (Some(a), Some(b)) => (a, b),
            _ => return Ok(false),
        };
        if !visited.insert((sock_a.id(), sock_b.id())) {
            trace!("Socket pair {:?} already compared", (sock_a.id(), sock_b.id()));
            return Ok(true);
        }
        if !compare_buffers(solver, constraints, sock_a.buffer(), sock_b.buffer())? {
            return Ok(false);
        }
        a = sock_a.peer();
        b = sock_b.peer();
    }
}

/// Name and descriptor have to match exactly, data is compared with `compare_buffers`.
pub fn compare_syscalls<S: Solver + ?Sized>(
    solver: &S,
    constraints: &ConstraintSet,
    a: &Syscall,
    b: &Syscall,
) -> Result<bool, Error> {
    if a.name != b.name || a.fd != b.fd {
        return Ok(false);
    }
    compare_buffers(solver, constraints, &a.data, &b.data)
}

/// Compares the layout and the content of two memories.
///
/// Maps are lined up by `MemoryMap::order_key` and have to agree in identity and
/// concrete bytes. Afterwards each address that is symbolic in either memory is
/// checked once with the solver, in ascending order.
pub fn compare_memory<S: Solver + ?Sized>(
    solver: &S,
    constraints: &ConstraintSet,
    a: &Memory,
    b: &Memory,
) -> Result<bool, Error> {
    let mut maps_a = a.maps().collect::<Vec<&MemoryMap>>();
    let mut maps_b = b.maps().collect::<Vec<&MemoryMap>>();
    if maps_a.len() != maps_b.len() {
        trace!("Map counts differ: {} / {}", maps_a.len(), maps_b.len());
        return Ok(false);
    }
    maps_a.sort_by(|x, y| x.order_key().cmp(&y.order_key()));
    maps_b.sort_by(|x, y| x.order_key().cmp(&y.order_key()));
    for (map_a, map_b) in maps_a.iter().zip(maps_b.iter()) {
        if !map_a.same_identity(map_b) {
            trace!("Maps differ: {:?} / {:?}", map_a.order_key(), map_b.order_key());
            return Ok(false);
        }
        if map_a.bytes() != map_b.bytes() {
            trace!("Concrete content of {} differs", map_a.name());
            return Ok(false);
        }
    }

    let mut addresses = a.symbolic_addresses()
        .chain(b.symbolic_addresses())
        .collect::<Vec<u64>>();
    addresses.sort_unstable();
    addresses.dedup();
    for address in addresses {
        if !compare_byte(solver, constraints, a, b, address)? {
            trace!("Symbolic byte at {:x} differs", address);
            return Ok(false);
        }
    }
    Ok(true)
}

fn compare_byte<S: Solver + ?Sized>(
    solver: &S,
    constraints: &ConstraintSet,
    a: &Memory,
    b: &Memory,
    address: u64,
) -> Result<bool, Error> {
    let val_a = a.read(address, 1)?;
    let val_b = b.read(address, 1)?;
    let (val_a, val_b) = match (&val_a[..], &val_b[..]) {
        ([x], [y]) => (x, y),
        ([_], other) | (other, _) => return Err(Error::ShortRead(address, 1, other.len())),
    };
    let cond = expr_eq(val_a.clone(), val_b.clone())?;
    Ok(solver.must_be_true(constraints, &cond))
}
