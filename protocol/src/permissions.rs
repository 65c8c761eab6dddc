/// Where a connection's messages originate from. The owner is the player who
/// created the lobby's colony; everyone else joins as a guest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OriginType {
    Server,
    Owner,
    Guest,
}

impl OriginType {
    pub fn as_str(self) -> &'static str {
        match self {
            OriginType::Server => "server",
            OriginType::Owner => "owner",
            OriginType::Guest => "guest",
        }
    }
}

/// Which origins are allowed to put a given message on the wire. Inbound
/// messages from an origin mapped to false are rejected before dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendPermissions {
    pub server: bool,
    pub owner: bool,
    pub guest: bool,
}

impl SendPermissions {
    pub fn allows(&self, origin: OriginType) -> bool {
        match origin {
            OriginType::Server => self.server,
            OriginType::Owner => self.owner,
            OriginType::Guest => self.guest,
        }
    }
}

pub const SERVER_ONLY: SendPermissions = SendPermissions {
    server: true,
    owner: false,
    guest: false,
};

pub const OWNER_ONLY: SendPermissions = SendPermissions {
    server: false,
    owner: true,
    guest: false,
};

pub const OWNER_AND_GUESTS: SendPermissions = SendPermissions {
    server: false,
    owner: true,
    guest: true,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_sets_gate_origins() {
        assert!(SERVER_ONLY.allows(OriginType::Server));
        assert!(!SERVER_ONLY.allows(OriginType::Owner));
        assert!(!SERVER_ONLY.allows(OriginType::Guest));

        assert!(OWNER_ONLY.allows(OriginType::Owner));
        assert!(!OWNER_ONLY.allows(OriginType::Guest));

        assert!(OWNER_AND_GUESTS.allows(OriginType::Owner));
        assert!(OWNER_AND_GUESTS.allows(OriginType::Guest));
        assert!(!OWNER_AND_GUESTS.allows(OriginType::Server));
    }
}
