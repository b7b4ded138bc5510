// qcommon.rs — protocol definitions shared by client and server

// ============================================================
// Protocol
// ============================================================

pub const PROTOCOL_VERSION: i32 = 34;

/// Server frames per second and the matching tick length.
pub const SERVER_FPS: i32 = 10;
pub const SERVER_FRAMETIME_MS: i32 = 1000 / SERVER_FPS;

/// Frame history depth. Must stay a power of two.
pub const UPDATE_BACKUP: usize = 16;
pub const UPDATE_MASK: usize = UPDATE_BACKUP - 1;

/// Outgoing command history depth. Must stay a power of two.
pub const CMD_BACKUP: usize = 256;
pub const CMD_MASK: usize = CMD_BACKUP - 1;

/// Entity ring capacity. Must stay a power of two.
pub const MAX_PARSE_ENTITIES: usize = 1024;

/// Slack the entity ring keeps between the newest write and the oldest
/// frame still allowed as a delta base.
pub const PARSE_ENTITIES_SLACK: usize = 128;

pub const MAX_MSGLEN: usize = 1400;

// ============================================================
// Server-to-client ops
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SvcOps {
    Bad = 0,
    MuzzleFlash,
    MuzzleFlash2,
    TempEntity,
    Layout,
    Inventory,
    Nop,
    Disconnect,
    Reconnect,
    Sound,
    Print,
    StuffText,
    ServerData,
    ConfigString,
    SpawnBaseline,
    CenterPrint,
    Download,
    PlayerInfo,
    PacketEntities,
    DeltaPacketEntities,
    Frame,
}

impl SvcOps {
    const ALL: [SvcOps; 21] = [
        SvcOps::Bad,
        SvcOps::MuzzleFlash,
        SvcOps::MuzzleFlash2,
        SvcOps::TempEntity,
        SvcOps::Layout,
        SvcOps::Inventory,
        SvcOps::Nop,
        SvcOps::Disconnect,
        SvcOps::Reconnect,
        SvcOps::Sound,
        SvcOps::Print,
        SvcOps::StuffText,
        SvcOps::ServerData,
        SvcOps::ConfigString,
        SvcOps::SpawnBaseline,
        SvcOps::CenterPrint,
        SvcOps::Download,
        SvcOps::PlayerInfo,
        SvcOps::PacketEntities,
        SvcOps::DeltaPacketEntities,
        SvcOps::Frame,
    ];

    pub fn from_byte(cmd: i32) -> Option<SvcOps> {
        usize::try_from(cmd).ok().and_then(|i| Self::ALL.get(i).copied())
    }

    /// Name used by net tracing.
    pub fn name(self) -> &'static str {
        match self {
            SvcOps::Bad => "svc_bad",
            SvcOps::MuzzleFlash => "svc_muzzleflash",
            SvcOps::MuzzleFlash2 => "svc_muzzlflash2",
            SvcOps::TempEntity => "svc_temp_entity",
            SvcOps::Layout => "svc_layout",
            SvcOps::Inventory => "svc_inventory",
            SvcOps::Nop => "svc_nop",
            SvcOps::Disconnect => "svc_disconnect",
            SvcOps::Reconnect => "svc_reconnect",
            SvcOps::Sound => "svc_sound",
            SvcOps::Print => "svc_print",
            SvcOps::StuffText => "svc_stufftext",
            SvcOps::ServerData => "svc_serverdata",
            SvcOps::ConfigString => "svc_configstring",
            SvcOps::SpawnBaseline => "svc_spawnbaseline",
            SvcOps::CenterPrint => "svc_centerprint",
            SvcOps::Download => "svc_download",
            SvcOps::PlayerInfo => "svc_playerinfo",
            SvcOps::PacketEntities => "svc_packetentities",
            SvcOps::DeltaPacketEntities => "svc_deltapacketentities",
            SvcOps::Frame => "svc_frame",
        }
    }
}

// ============================================================
// Client-to-server ops
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ClcOps {
    Bad = 0,
    Nop,
    Move,
    UserInfo,
    StringCmd,
}

// ============================================================
// Player state communication flags
// ============================================================

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct PlayerStateBits: u16 {
        const M_TYPE         = 1 << 0;
        const M_ORIGIN       = 1 << 1;
        const M_VELOCITY     = 1 << 2;
        const M_TIME         = 1 << 3;
        const M_FLAGS        = 1 << 4;
        const M_GRAVITY      = 1 << 5;
        const M_DELTA_ANGLES = 1 << 6;
        const VIEWOFFSET     = 1 << 7;
        const VIEWANGLES     = 1 << 8;
        const KICKANGLES     = 1 << 9;
        const BLEND          = 1 << 10;
        const FOV            = 1 << 11;
        const WEAPONINDEX    = 1 << 12;
        const WEAPONFRAME    = 1 << 13;
        const RDFLAGS        = 1 << 14;
    }
}

// ============================================================
// User command communication flags
// ============================================================

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct UserCmdBits: u8 {
        const ANGLE1  = 1 << 0;
        const ANGLE2  = 1 << 1;
        const ANGLE3  = 1 << 2;
        const FORWARD = 1 << 3;
        const SIDE    = 1 << 4;
        const UP      = 1 << 5;
        const BUTTONS = 1 << 6;
        const IMPULSE = 1 << 7;
    }
}

// ============================================================
// Sound flags
// ============================================================

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct SoundFlags: u8 {
        /// a byte
        const VOLUME      = 1 << 0;
        /// a byte
        const ATTENUATION = 1 << 1;
        /// three coordinates
        const POS         = 1 << 2;
        /// a short 0-2: channel, 3-12: entity
        const ENT         = 1 << 3;
        /// a byte, msec offset from frame start
        const OFFSET      = 1 << 4;
    }
}

pub const DEFAULT_SOUND_PACKET_VOLUME: f32 = 1.0;
pub const DEFAULT_SOUND_PACKET_ATTENUATION: f32 = 1.0;

// ============================================================
// Entity state communication flags
// ============================================================

bitflags::bitflags! {
    /// Changed-field mask preceding every entity delta. Sent as one to four
    /// bytes; each MOREBITS flag announces the next byte.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct EntityBits: u32 {
        // first byte
        const ORIGIN1    = 1 << 0;
        const ORIGIN2    = 1 << 1;
        const ANGLE2     = 1 << 2;
        const ANGLE3     = 1 << 3;
        /// frame is a byte
        const FRAME8     = 1 << 4;
        const EVENT      = 1 << 5;
        /// REMOVE this entity, don't add it
        const REMOVE     = 1 << 6;
        /// read one additional byte
        const MOREBITS1  = 1 << 7;

        // second byte
        /// NUMBER8 is implicit if not set
        const NUMBER16   = 1 << 8;
        const ORIGIN3    = 1 << 9;
        const ANGLE1     = 1 << 10;
        const MODEL      = 1 << 11;
        /// fullbright, etc
        const RENDERFX8  = 1 << 12;
        /// autorotate, trails, etc
        const EFFECTS8   = 1 << 14;
        /// read one additional byte
        const MOREBITS2  = 1 << 15;

        // third byte
        const SKIN8      = 1 << 16;
        /// frame is a short
        const FRAME16    = 1 << 17;
        /// 8 + 16 = 32
        const RENDERFX16 = 1 << 18;
        /// 8 + 16 = 32
        const EFFECTS16  = 1 << 19;
        /// weapons, flags, etc
        const MODEL2     = 1 << 20;
        const MODEL3     = 1 << 21;
        const MODEL4     = 1 << 22;
        /// read one additional byte
        const MOREBITS3  = 1 << 23;

        // fourth byte
        /// beams and new entities
        const OLDORIGIN  = 1 << 24;
        const SKIN16     = 1 << 25;
        const SOUND      = 1 << 26;
        const SOLID      = 1 << 27;
    }
}
