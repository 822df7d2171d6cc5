//! Newtypes around voice service IDs.

use crate::model::id::{GuildId as DriverGuild, UserId as DriverUser};
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    num::NonZeroU64,
};

macro_rules! impl_id {
    ($Id:ident) => {
        impl $Id {
            /// Returns the u64 representation of this Id.
            pub fn get(self) -> u64 {
                self.0.get()
            }
        }

        impl Display for $Id {
            fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
                Display::fmt(&self.0, f)
            }
        }

        impl From<NonZeroU64> for $Id {
            fn from(id: NonZeroU64) -> Self {
                Self(id)
            }
        }

        impl From<$Id> for NonZeroU64 {
            fn from(id: $Id) -> Self {
                id.0
            }
        }
    };
}

/// ID of a voice/text channel.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct ChannelId(NonZeroU64);

/// ID of a guild (colloquially, "server").
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct GuildId(NonZeroU64);

/// ID of a user.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct UserId(NonZeroU64);

impl_id! {ChannelId}
impl_id! {GuildId}
impl_id! {UserId}

impl From<GuildId> for DriverGuild {
    fn from(id: GuildId) -> Self {
        Self(id.get())
    }
}

impl From<UserId> for DriverUser {
    fn from(id: UserId) -> Self {
        Self(id.get())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn ids_convert_for_gateway_payloads() {
        let id = GuildId::from(NonZeroU64::new(41771983423143937).unwrap());

        assert_eq!(DriverGuild::from(id).0, 41771983423143937);
        assert_eq!(id.to_string(), "41771983423143937");
    }
}
