//! Play-state packet ids and join-game layouts for each protocol range the
//! client can log in with (1.8 through 1.15.2).

/// Where the join-game packet differs between releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayLayout {
    pub(super) join_game: i32,
    pub(super) disconnect: i32,
    /// Dimension is an Int from 1.9.1 on, a Byte before.
    pub(super) int_dimension: bool,
    /// Hashed seed (Long) follows the dimension from 1.15 on.
    pub(super) hashed_seed: bool,
    /// Difficulty byte was moved out of join-game in 1.14.
    pub(super) difficulty: bool,
    /// Login Plugin Request exists from 1.13 on.
    pub(super) login_plugin: bool,
}

impl PlayLayout {
    pub fn for_protocol(protocol: i32) -> Option<Self> {
        let layout = match protocol {
            // 1.8.x
            47 => Self {
                join_game: 0x01,
                disconnect: 0x40,
                int_dimension: false,
                hashed_seed: false,
                difficulty: true,
                login_plugin: false,
            },
            // 1.9
            107 => Self {
                join_game: 0x23,
                disconnect: 0x1A,
                int_dimension: false,
                hashed_seed: false,
                difficulty: true,
                login_plugin: false,
            },
            // 1.9.1 - 1.12.2
            108..=340 => Self {
                join_game: 0x23,
                disconnect: 0x1A,
                int_dimension: true,
                hashed_seed: false,
                difficulty: true,
                login_plugin: false,
            },
            // 1.13 - 1.13.2
            393..=404 => Self {
                join_game: 0x25,
                disconnect: 0x1B,
                int_dimension: true,
                hashed_seed: false,
                difficulty: true,
                login_plugin: true,
            },
            // 1.14 - 1.14.4
            477..=498 => Self {
                join_game: 0x25,
                disconnect: 0x1A,
                int_dimension: true,
                hashed_seed: false,
                difficulty: false,
                login_plugin: true,
            },
            // 1.15 - 1.15.2
            573..=578 => Self {
                join_game: 0x26,
                disconnect: 0x1B,
                int_dimension: true,
                hashed_seed: true,
                difficulty: false,
                login_plugin: true,
            },
            _ => return None,
        };
        Some(layout)
    }
}
