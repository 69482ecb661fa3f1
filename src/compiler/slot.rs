//! Slots are the compiler's handles on where a value lives.

use std::rc::Rc;

use bitflags::bitflags;

use crate::value::{ArrayRef, Value};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SlotFlags: u8 {
        /// bound to a name, so it is never freed as a temporary
        const NAMED = 1 << 0;
        /// may be the target of `:=`
        const MUTABLE = 1 << 1;
        /// a return instruction for this value was already emitted
        const RETURNED = 1 << 2;
    }
}

#[derive(Debug, Clone)]
pub enum Location {
    /// embedded in the code
    Constant(Value),
    /// a register of the function being compiled
    Local(u16),
    /// a register of an enclosing function's frame, reached through the
    /// closure environment `env`
    Upvalue { env: u16, index: u16 },
    /// a one element array holding a top-level `var`
    Ref(ArrayRef),
}

#[derive(Debug, Clone)]
pub struct Slot {
    pub flags: SlotFlags,
    pub location: Location,
}

impl Slot {
    pub fn constant(value: Value) -> Self {
        Self {
            flags: SlotFlags::empty(),
            location: Location::Constant(value),
        }
    }

    pub fn nil() -> Self {
        Self::constant(Value::Nil)
    }

    pub fn local(register: u16) -> Self {
        Self {
            flags: SlotFlags::empty(),
            location: Location::Local(register),
        }
    }

    pub fn reference(cell: ArrayRef) -> Self {
        Self {
            flags: SlotFlags::MUTABLE | SlotFlags::NAMED,
            location: Location::Ref(cell),
        }
    }

    pub fn with_flags(mut self, flags: SlotFlags) -> Self {
        self.flags |= flags;
        self
    }

    pub fn is_constant(&self) -> bool {
        matches!(self.location, Location::Constant(_))
    }

    pub fn constant_value(&self) -> Option<&Value> {
        match &self.location {
            Location::Constant(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_nil_constant(&self) -> bool {
        matches!(self.location, Location::Constant(Value::Nil))
    }

    pub fn is_named(&self) -> bool {
        self.flags.contains(SlotFlags::NAMED)
    }

    pub fn is_mutable(&self) -> bool {
        self.flags.contains(SlotFlags::MUTABLE)
    }

    pub fn is_returned(&self) -> bool {
        self.flags.contains(SlotFlags::RETURNED)
    }

    /// The register, if this lives in the current frame
    pub fn local_register(&self) -> Option<u16> {
        match self.location {
            Location::Local(register) => Some(register),
            _ => None,
        }
    }

    /// The register, if it fits an 8 bit operand
    pub fn near_register(&self) -> Option<u8> {
        self.local_register().and_then(|reg| u8::try_from(reg).ok())
    }

    /// Whether two slots name the same storage, so copying between them is a no-op
    pub fn same_storage(&self, other: &Slot) -> bool {
        match (&self.location, &other.location) {
            (Location::Local(a), Location::Local(b)) => a == b,
            (
                Location::Upvalue { env, index },
                Location::Upvalue {
                    env: other_env,
                    index: other_index,
                },
            ) => env == other_env && index == other_index,
            (Location::Ref(a), Location::Ref(b)) => Rc::ptr_eq(a, b),
            (Location::Constant(a), Location::Constant(b)) => a == b,
            _ => false,
        }
    }
}
