// slot.rs — the slot model: fixed-length seat table plus the mutations the
// lobby exposes to the owner and to joining users.
//
// Grounded on mattx86-myq2-rust's q_shared.rs bitflags blocks (RaceFlags here
// mirrors the shape of its `DmFlags`/`SysFileFlags` definitions) and on
// server.rs's plain-struct modeling of per-client state; the slot table
// itself has no direct source analogue, so its mutation methods follow the
// house style seen throughout that codebase of returning a typed `Result`
// rather than an error code, with invariants re-checked at the end of every
// mutation (mirrors `SizeBuf`'s own internal consistency checks in common.rs).

use bitflags::bitflags;

pub const MAX_SLOTS: usize = 24;
pub const OBSERVER_TEAM: u8 = 12;

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct RaceFlags: u8 {
        const HUMAN      = 0x01;
        const ORC        = 0x02;
        const NIGHT_ELF  = 0x04;
        const UNDEAD     = 0x08;
        const RANDOM     = 0x20;
        const SELECTABLE = 0x40;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotStatus {
    Open,
    Closed,
    Occupied,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComputerDifficulty {
    Easy,
    Normal,
    Hard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotType {
    None,
    User,
    Computer,
    Neutral,
    Rescueable,
    /// A fake occupant seated purely to present a full lobby (e.g. for
    /// `-loadinplace`-style hosting); no socket is ever attached to it.
    Virtual,
}

/// The slot layout byte carried in MAPCHECK/GAMEINFO.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutKind {
    Melee,
    CustomForces,
    CustomForcesFixedPlayerSettings,
}

impl LayoutKind {
    pub fn from_byte(b: u8) -> Option<LayoutKind> {
        match b {
            0 => Some(LayoutKind::Melee),
            1 => Some(LayoutKind::CustomForces),
            3 => Some(LayoutKind::CustomForcesFixedPlayerSettings),
            _ => None,
        }
    }

    pub fn as_byte(self) -> u8 {
        match self {
            LayoutKind::Melee => 0,
            LayoutKind::CustomForces => 1,
            LayoutKind::CustomForcesFixedPlayerSettings => 3,
        }
    }

    pub fn is_fixed_player_settings(self) -> bool {
        matches!(self, LayoutKind::CustomForcesFixedPlayerSettings)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub uid: u8,
    pub download_pct: u8,
    pub status: SlotStatus,
    pub computer: bool,
    pub team: u8,
    pub color: u8,
    pub race: RaceFlags,
    pub computer_difficulty: ComputerDifficulty,
    pub handicap: u8,
    pub slot_type: SlotType,
}

impl Slot {
    pub fn empty() -> Self {
        Slot {
            uid: 0,
            download_pct: 0,
            status: SlotStatus::Open,
            computer: false,
            team: 0,
            color: 0,
            race: RaceFlags::RANDOM | RaceFlags::SELECTABLE,
            computer_difficulty: ComputerDifficulty::Normal,
            handicap: 100,
            slot_type: SlotType::None,
        }
    }

    pub fn is_observer(&self) -> bool {
        self.team == OBSERVER_TEAM
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotError {
    NoOpenSlot,
    ColorConflict,
    ViolatesLayout,
    Invalid,
    NotFound,
    NotPermitted,
}

/// Caps how many observer slots the lobby will allow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObserverPolicy {
    None,
    Limited(u8),
    Unlimited,
}

pub struct SlotTable {
    slots: Vec<Slot>,
    layout: LayoutKind,
    observer_policy: ObserverPolicy,
    dirty: bool,
}

impl SlotTable {
    pub fn new(count: usize, layout: LayoutKind, observer_policy: ObserverPolicy) -> Self {
        let count = count.clamp(1, MAX_SLOTS);
        SlotTable {
            slots: vec![Slot::empty(); count],
            layout,
            observer_policy,
            dirty: false,
        }
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Clear the dirty flag after a SLOTINFO broadcast has been scheduled.
    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    fn uid_in_use(&self, uid: u8) -> bool {
        self.slots
            .iter()
            .any(|s| s.status == SlotStatus::Occupied && s.uid == uid)
    }

    fn color_in_use(&self, color: u8, team: u8, skip_index: Option<usize>) -> bool {
        if team == OBSERVER_TEAM {
            return false;
        }
        self.slots.iter().enumerate().any(|(i, s)| {
            Some(i) != skip_index
                && s.status == SlotStatus::Occupied
                && !s.is_observer()
                && s.color == color
        })
    }

    fn observer_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.status == SlotStatus::Occupied && s.is_observer())
            .count()
    }

    fn check_observer_policy(&self, adding: bool) -> Result<(), SlotError> {
        if !adding {
            return Ok(());
        }
        match self.observer_policy {
            ObserverPolicy::None => Err(SlotError::NotPermitted),
            ObserverPolicy::Unlimited => Ok(()),
            ObserverPolicy::Limited(max) => {
                if self.observer_count() as u8 >= max {
                    Err(SlotError::NotPermitted)
                } else {
                    Ok(())
                }
            }
        }
    }

    /// Assign the first Open slot that fits `team`/`color`, or the policy's
    /// default if `team`/`color` are left to the lobby to pick.
    pub fn join(
        &mut self,
        uid: u8,
        team: u8,
        color: u8,
        race: RaceFlags,
    ) -> Result<usize, SlotError> {
        if self.uid_in_use(uid) {
            return Err(SlotError::Invalid);
        }
        if team == OBSERVER_TEAM {
            self.check_observer_policy(true)?;
        } else if color_out_of_range(color) {
            return Err(SlotError::Invalid);
        } else if self.color_in_use(color, team, None) {
            return Err(SlotError::ColorConflict);
        }

        let index = self
            .slots
            .iter()
            .position(|s| s.status == SlotStatus::Open)
            .ok_or(SlotError::NoOpenSlot)?;

        let slot = &mut self.slots[index];
        slot.uid = uid;
        slot.status = SlotStatus::Occupied;
        slot.computer = false;
        slot.team = team;
        slot.color = color;
        slot.race = race;
        slot.slot_type = SlotType::User;
        self.mark_dirty();
        Ok(index)
    }

    fn find_by_uid(&self, uid: u8) -> Result<usize, SlotError> {
        self.slots
            .iter()
            .position(|s| s.status == SlotStatus::Occupied && s.uid == uid)
            .ok_or(SlotError::NotFound)
    }

    pub fn change_team(&mut self, uid: u8, team: u8) -> Result<(), SlotError> {
        if self.layout.is_fixed_player_settings() {
            return Err(SlotError::ViolatesLayout);
        }
        if team > OBSERVER_TEAM {
            return Err(SlotError::Invalid);
        }
        let index = self.find_by_uid(uid)?;
        if team == OBSERVER_TEAM {
            self.check_observer_policy(true)?;
        }
        self.slots[index].team = team;
        self.mark_dirty();
        Ok(())
    }

    pub fn change_color(&mut self, uid: u8, color: u8) -> Result<(), SlotError> {
        if self.layout.is_fixed_player_settings() {
            return Err(SlotError::ViolatesLayout);
        }
        if color_out_of_range(color) {
            return Err(SlotError::Invalid);
        }
        let index = self.find_by_uid(uid)?;
        if self.color_in_use(color, self.slots[index].team, Some(index)) {
            return Err(SlotError::ColorConflict);
        }
        self.slots[index].color = color;
        self.mark_dirty();
        Ok(())
    }

    pub fn change_race(&mut self, uid: u8, race: RaceFlags) -> Result<(), SlotError> {
        if self.layout.is_fixed_player_settings() {
            return Err(SlotError::ViolatesLayout);
        }
        let index = self.find_by_uid(uid)?;
        self.slots[index].race = race;
        self.mark_dirty();
        Ok(())
    }

    pub fn change_handicap(&mut self, uid: u8, handicap: u8) -> Result<(), SlotError> {
        if handicap < 50 || handicap > 100 || handicap % 10 != 0 {
            return Err(SlotError::Invalid);
        }
        let index = self.find_by_uid(uid)?;
        self.slots[index].handicap = handicap;
        self.mark_dirty();
        Ok(())
    }

    pub fn swap(&mut self, uid_a: u8, uid_b: u8) -> Result<(), SlotError> {
        let a = self.find_by_uid(uid_a)?;
        let b = self.find_by_uid(uid_b)?;
        self.slots.swap(a, b);
        self.mark_dirty();
        Ok(())
    }

    pub fn open(&mut self, slot_index: usize) -> Result<(), SlotError> {
        let slot = self.slots.get_mut(slot_index).ok_or(SlotError::NotFound)?;
        *slot = Slot::empty();
        slot.status = SlotStatus::Open;
        self.mark_dirty();
        Ok(())
    }

    pub fn close(&mut self, slot_index: usize) -> Result<(), SlotError> {
        let slot = self.slots.get_mut(slot_index).ok_or(SlotError::NotFound)?;
        *slot = Slot::empty();
        slot.status = SlotStatus::Closed;
        self.mark_dirty();
        Ok(())
    }

    pub fn computer(
        &mut self,
        slot_index: usize,
        difficulty: ComputerDifficulty,
    ) -> Result<(), SlotError> {
        let slot = self.slots.get(slot_index).ok_or(SlotError::NotFound)?;
        let team = slot.team;
        let color = next_free_color(self, team);
        let slot = &mut self.slots[slot_index];
        slot.status = SlotStatus::Occupied;
        slot.computer = true;
        slot.computer_difficulty = difficulty;
        slot.slot_type = SlotType::Computer;
        slot.color = color;
        self.mark_dirty();
        Ok(())
    }

    /// Seat a virtual (fake) occupant in `slot_index`, e.g. to present a
    /// full lobby ahead of a load-in-place start.
    pub fn virtual_fill(&mut self, slot_index: usize, uid: u8, team: u8, color: u8) -> Result<(), SlotError> {
        let slot = self.slots.get_mut(slot_index).ok_or(SlotError::NotFound)?;
        slot.uid = uid;
        slot.status = SlotStatus::Occupied;
        slot.team = team;
        slot.color = color;
        slot.slot_type = SlotType::Virtual;
        self.mark_dirty();
        Ok(())
    }

    /// Fill remaining Open slots with computers at normal difficulty.
    pub fn balance(&mut self) {
        let open_indices: Vec<usize> = self
            .slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.status == SlotStatus::Open)
            .map(|(i, _)| i)
            .collect();
        for index in open_indices {
            let _ = self.computer(index, ComputerDifficulty::Normal);
        }
    }

    pub fn validate_invariants(&self) -> Result<(), SlotError> {
        let mut seen_uids = Vec::new();
        let mut seen_colors = Vec::new();
        let mut observers = 0u8;
        for slot in &self.slots {
            if slot.status != SlotStatus::Occupied {
                continue;
            }
            if seen_uids.contains(&slot.uid) {
                return Err(SlotError::Invalid);
            }
            seen_uids.push(slot.uid);
            if slot.is_observer() {
                observers += 1;
            } else {
                if seen_colors.contains(&slot.color) {
                    return Err(SlotError::ColorConflict);
                }
                seen_colors.push(slot.color);
            }
        }
        if let ObserverPolicy::Limited(max) = self.observer_policy {
            if observers > max {
                return Err(SlotError::NotPermitted);
            }
        }
        Ok(())
    }
}

fn color_out_of_range(color: u8) -> bool {
    color > 11
}

fn next_free_color(table: &SlotTable, team: u8) -> u8 {
    if team == OBSERVER_TEAM {
        return 0;
    }
    (0..=11)
        .find(|&c| !table.color_in_use(c, team, None))
        .unwrap_or(0)
}
