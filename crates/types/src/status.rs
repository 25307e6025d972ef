use serde::{Deserialize, Serialize};

/// Normalized inverter state, independent of any vendor's raw code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Waiting,
    StartingA,
    StartingB,
    Generating,
    Standby,
    Fault,
    Off,
}

impl Status {
    /// Code published on the bus (Victron pvinverter `/StatusCode`).
    pub fn code(self) -> u8 {
        match self {
            Status::Waiting => 0,
            Status::StartingA => 1,
            Status::StartingB => 2,
            Status::Generating => 7,
            Status::Standby | Status::Off => 8,
            Status::Fault => 10,
        }
    }
}

/// Vendor code to [`Status`] mapping. Codes missing from the table are faults.
#[derive(Debug, Clone, Copy)]
pub struct StatusTable {
    entries: &'static [(u16, Status)],
}

impl StatusTable {
    pub const fn new(entries: &'static [(u16, Status)]) -> Self {
        Self { entries }
    }

    pub fn lookup(&self, code: u16) -> Status {
        self.entries
            .iter()
            .find(|(vendor, _)| *vendor == code)
            .map(|(_, status)| *status)
            .unwrap_or(Status::Fault)
    }

    pub fn codes(&self) -> impl Iterator<Item = u16> + '_ {
        self.entries.iter().map(|(code, _)| *code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: StatusTable = StatusTable::new(&[(0, Status::Waiting), (5, Status::Standby)]);

    #[test]
    fn lookup_falls_back_to_fault() {
        assert_eq!(TABLE.lookup(0), Status::Waiting);
        assert_eq!(TABLE.lookup(5), Status::Standby);
        assert_eq!(TABLE.lookup(1), Status::Fault);
        assert_eq!(TABLE.codes().collect::<Vec<_>>(), vec![0, 5]);
    }

    #[test]
    fn victron_codes() {
        assert_eq!(Status::Generating.code(), 7);
        assert_eq!(Status::Off.code(), 8);
        assert_eq!(Status::Fault.code(), 10);
    }
}
