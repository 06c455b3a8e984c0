/// Address reservation backing LR/SC.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct Reservation {
    pub address: u32,
    pub valid: bool,
}

/// Retirement-side maintenance of the reservation: an LR retiring writes
/// the snapshot, an SC retiring clears it.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ReservationUpdate {
    pub load: bool,
    pub address: u32,
    pub valid: bool,
}

/// Two-register load-reservation tracker: a speculative copy mutated by
/// LR/SC as they execute, and a snapshot mutated only by retirement.
/// Recovery restores the speculative copy from the snapshot, which keeps
/// LR/SC atomicity across arbitrary rollback.
#[derive(Debug, Clone, Default)]
pub struct LoadReservation {
    current: Reservation,
    snapshot: Reservation,
}

impl LoadReservation {
    pub fn new() -> Self {
        Self::default()
    }

    /// LR execution: reserve the address speculatively.
    pub fn set(&mut self, address: u32) {
        self.current = Reservation {
            address,
            valid: true,
        };
    }

    /// SC execution: succeed only on a live reservation for this address.
    pub fn check(&self, address: u32) -> bool {
        self.current.valid && self.current.address == address
    }

    /// SC execution consumes the reservation whether or not it succeeds.
    pub fn clear(&mut self) {
        self.current.valid = false;
    }

    pub fn update(&mut self, up: ReservationUpdate) {
        if up.load {
            self.snapshot = Reservation {
                address: up.address,
                valid: up.valid,
            };
        } else {
            self.snapshot.valid = false;
        }
    }

    pub fn recover(&mut self) {
        self.current = self.snapshot;
    }

    pub fn current(&self) -> Reservation {
        self.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sc_requires_matching_reservation() {
        let mut lr = LoadReservation::new();
        assert!(!lr.check(0x100));

        lr.set(0x100);
        assert!(lr.check(0x100));
        assert!(!lr.check(0x104));

        lr.clear();
        assert!(!lr.check(0x100));
    }

    #[test]
    fn test_recovery_restores_snapshot() {
        let mut lr = LoadReservation::new();

        // A speculative LR that never retires is undone by recovery.
        lr.set(0x100);
        lr.recover();
        assert!(!lr.check(0x100));

        // A retired LR survives recovery.
        lr.set(0x200);
        lr.update(ReservationUpdate {
            load: true,
            address: 0x200,
            valid: true,
        });
        lr.recover();
        assert!(lr.check(0x200));

        // A retired SC clears it for good.
        lr.update(ReservationUpdate {
            load: false,
            address: 0,
            valid: false,
        });
        lr.recover();
        assert!(!lr.check(0x200));
    }
}
