use flipdot_proto::{DeviceFlags, Flag, StatusSnapshot};

/// Cache of the device's switches.
///
/// `confirmed` only changes when a snapshot reports a value. Toggles the
/// operator sends are kept as `requested` until the next snapshot settles
/// them, whichever way it goes.
#[derive(Debug, Default)]
pub struct FlagMirror {
    confirmed: DeviceFlags,
    requested: [Option<bool>; 4],
    synced: bool,
}

impl FlagMirror {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once any snapshot has arrived. Flag controls stay disabled
    /// before that.
    pub fn is_synced(&self) -> bool {
        self.synced
    }

    pub fn confirmed(&self) -> DeviceFlags {
        self.confirmed
    }

    pub fn requested(&self, flag: Flag) -> Option<bool> {
        self.requested[index(flag)]
    }

    pub fn request(&mut self, flag: Flag, on: bool) {
        self.requested[index(flag)] = Some(on);
    }

    /// Mirrors a snapshot. Reported flags overwrite both the confirmed value
    /// and any pending request; unreported flags are left alone.
    pub fn apply(&mut self, snapshot: &StatusSnapshot) {
        snapshot.apply_to(&mut self.confirmed);
        for flag in Flag::ALL {
            if snapshot.flag(flag).is_some() {
                self.requested[index(flag)] = None;
            }
        }
        self.synced = true;
    }
}

fn index(flag: Flag) -> usize {
    match flag {
        Flag::Backlight => 0,
        Flag::Invert => 1,
        Flag::Active => 2,
        Flag::Quick => 3,
    }
}
