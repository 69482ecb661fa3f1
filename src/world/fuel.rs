//! Fuel for the machine

/// Budget of instructions the interpreter may execute before giving up.
#[derive(Debug, Clone)]
pub struct Fuel {
    fuel: i64,
}

impl Fuel {
    pub fn with(fuel: i64) -> Self {
        Self { fuel }
    }

    /// Refills fuel up to a given maximum.
    ///
    /// Meant to be called between top-level evaluations that share one fuel
    /// container, so available fuel never grows without bound.
    pub fn refill(&mut self, fuel: i64, max_fuel: i64) {
        self.fuel = self.fuel.saturating_add(fuel).min(max_fuel);
    }

    /// Subtract from the current remaining fuel.
    pub fn consume(&mut self, fuel: i64) {
        self.fuel = self.fuel.saturating_sub(fuel);
    }

    pub fn remaining(&self) -> i64 {
        self.fuel
    }

    /// Returns true if we have positive fuel remaining
    pub fn should_continue(&self) -> bool {
        self.fuel > 0
    }
}
