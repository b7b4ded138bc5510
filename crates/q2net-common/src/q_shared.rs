// q_shared.rs — types and math shared by every layer of the protocol

pub type Vec3 = [f32; 3];

pub const VEC3_ORIGIN: Vec3 = [0.0, 0.0, 0.0];

// angle indexes
pub const PITCH: usize = 0; // up / down
pub const YAW: usize = 1; // left / right
pub const ROLL: usize = 2; // fall over

// ============================================================
// Limits
// ============================================================

pub const MAX_CLIENTS: usize = 256;
pub const MAX_EDICTS: usize = 1024;
pub const MAX_LIGHTSTYLES: usize = 256;
pub const MAX_MODELS: usize = 256;
pub const MAX_SOUNDS: usize = 256;
pub const MAX_IMAGES: usize = 256;
pub const MAX_ITEMS: usize = 256;
pub const MAX_GENERAL: usize = MAX_CLIENTS * 2;
pub const MAX_STATS: usize = 32;

pub const MAX_QPATH: usize = 64;
pub const MAX_STRING_CHARS: usize = 2048;

// ============================================================
// Config strings
// ============================================================

pub const CS_NAME: usize = 0;
pub const CS_CDTRACK: usize = 1;
pub const CS_SKY: usize = 2;
pub const CS_SKYAXIS: usize = 3;
pub const CS_SKYROTATE: usize = 4;
pub const CS_STATUSBAR: usize = 5;
pub const CS_AIRACCEL: usize = 29;
pub const CS_MAXCLIENTS: usize = 30;
pub const CS_MAPCHECKSUM: usize = 31;
pub const CS_MODELS: usize = 32;
pub const CS_SOUNDS: usize = CS_MODELS + MAX_MODELS;
pub const CS_IMAGES: usize = CS_SOUNDS + MAX_SOUNDS;
pub const CS_LIGHTS: usize = CS_IMAGES + MAX_IMAGES;
pub const CS_ITEMS: usize = CS_LIGHTS + MAX_LIGHTSTYLES;
pub const CS_PLAYERSKINS: usize = CS_ITEMS + MAX_ITEMS;
pub const CS_GENERAL: usize = CS_PLAYERSKINS + MAX_CLIENTS;
pub const MAX_CONFIGSTRINGS: usize = CS_GENERAL + MAX_GENERAL;

// ============================================================
// Print levels
// ============================================================

pub const PRINT_LOW: i32 = 0; // pickup messages
pub const PRINT_MEDIUM: i32 = 1; // death messages
pub const PRINT_HIGH: i32 = 2; // critical messages
pub const PRINT_CHAT: i32 = 3; // chat messages

// ============================================================
// Entity events
// ============================================================

pub const EV_NONE: i32 = 0;
pub const EV_ITEM_RESPAWN: i32 = 1;
pub const EV_FOOTSTEP: i32 = 2;
pub const EV_FALLSHORT: i32 = 3;
pub const EV_FALL: i32 = 4;
pub const EV_FALLFAR: i32 = 5;
pub const EV_PLAYER_TELEPORT: i32 = 6;
pub const EV_OTHER_TELEPORT: i32 = 7;

/// Render flag marking a beam; beams always carry an explicit old_origin.
pub const RF_BEAM: i32 = 128;

// ============================================================
// Contents and surface flags (as reported by the collision oracle)
// ============================================================

pub const CONTENTS_SOLID: i32 = 1;
pub const CONTENTS_WINDOW: i32 = 2;
pub const CONTENTS_LAVA: i32 = 8;
pub const CONTENTS_SLIME: i32 = 16;
pub const CONTENTS_WATER: i32 = 32;
pub const CONTENTS_MIST: i32 = 64;

pub const CONTENTS_CURRENT_0: i32 = 0x40000;
pub const CONTENTS_CURRENT_90: i32 = 0x80000;
pub const CONTENTS_CURRENT_180: i32 = 0x100000;
pub const CONTENTS_CURRENT_270: i32 = 0x200000;
pub const CONTENTS_CURRENT_UP: i32 = 0x400000;
pub const CONTENTS_CURRENT_DOWN: i32 = 0x800000;
pub const CONTENTS_LADDER: i32 = 0x20000000;

pub const MASK_WATER: i32 = CONTENTS_WATER | CONTENTS_LAVA | CONTENTS_SLIME;
pub const MASK_CURRENT: i32 = CONTENTS_CURRENT_0
    | CONTENTS_CURRENT_90
    | CONTENTS_CURRENT_180
    | CONTENTS_CURRENT_270
    | CONTENTS_CURRENT_UP
    | CONTENTS_CURRENT_DOWN;

pub const SURF_SLICK: i32 = 0x2;

pub const MAXTOUCH: usize = 32;
pub const MAX_CLIP_PLANES: usize = 5;

// ============================================================
// Math
// ============================================================

#[inline]
pub fn dot_product(a: &Vec3, b: &Vec3) -> f32 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

#[inline]
pub fn cross_product(a: &Vec3, b: &Vec3) -> Vec3 {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

#[inline]
pub fn vector_length(v: &Vec3) -> f32 {
    dot_product(v, v).sqrt()
}

#[inline]
pub fn vector_scale(v: &Vec3, scale: f32) -> Vec3 {
    [v[0] * scale, v[1] * scale, v[2] * scale]
}

#[inline]
pub fn vector_ma(start: &Vec3, scale: f32, dir: &Vec3) -> Vec3 {
    [
        start[0] + scale * dir[0],
        start[1] + scale * dir[1],
        start[2] + scale * dir[2],
    ]
}

/// Normalizes in place and returns the original length.
pub fn vector_normalize(v: &mut Vec3) -> f32 {
    let length = vector_length(v);
    if length != 0.0 {
        let ilength = 1.0 / length;
        v[0] *= ilength;
        v[1] *= ilength;
        v[2] *= ilength;
    }
    length
}

pub fn angle_vectors(angles: &Vec3) -> (Vec3, Vec3, Vec3) {
    let (sy, cy) = angles[YAW].to_radians().sin_cos();
    let (sp, cp) = angles[PITCH].to_radians().sin_cos();
    let (sr, cr) = angles[ROLL].to_radians().sin_cos();

    let forward = [cp * cy, cp * sy, -sp];
    let right = [
        -sr * sp * cy + cr * sy,
        -sr * sp * sy - cr * cy,
        -sr * cp,
    ];
    let up = [
        cr * sp * cy + sr * sy,
        cr * sp * sy - sr * cy,
        cr * cp,
    ];
    (forward, right, up)
}

#[inline]
pub fn angle2short(x: f32) -> i32 {
    ((x * 65536.0 / 360.0) as i32) & 65535
}

#[inline]
pub fn short2angle(x: i16) -> f32 {
    (x as f32) * (360.0 / 65536.0)
}

// ============================================================
// Player movement state
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum PmType {
    #[default]
    Normal = 0,
    Spectator = 1,
    // no acceleration or turning
    Dead = 2,
    Gib = 3, // different bounding box
    Freeze = 4,
}

impl PmType {
    /// Unknown wire values decode as `Normal`.
    pub fn from_wire(value: i32) -> Self {
        match value {
            1 => PmType::Spectator,
            2 => PmType::Dead,
            3 => PmType::Gib,
            4 => PmType::Freeze,
            _ => PmType::Normal,
        }
    }
}

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct PmFlags: u8 {
        const DUCKED         = 1;
        const JUMP_HELD      = 2;
        const ON_GROUND      = 4;
        /// pm_time is waterjump
        const TIME_WATERJUMP = 8;
        /// pm_time is time before rejump
        const TIME_LAND      = 16;
        /// pm_time is non-moving time
        const TIME_TELEPORT  = 32;
        /// temporarily disables prediction (used for grappling hook)
        const NO_PREDICTION  = 64;
    }
}

impl PmFlags {
    pub const TIMERS: PmFlags = PmFlags::TIME_WATERJUMP
        .union(PmFlags::TIME_LAND)
        .union(PmFlags::TIME_TELEPORT);
}

/// The part of the player state that is delta-compressed and predicted.
/// Positions and velocities are in 1/8 unit fixed point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PmoveState {
    pub pm_type: PmType,
    pub origin: [i16; 3],
    pub velocity: [i16; 3],
    pub pm_flags: PmFlags,
    /// each unit = 8 ms
    pub pm_time: u8,
    pub gravity: i16,
    /// add to command angles to get view direction
    pub delta_angles: [i16; 3],
}

/// One tick of captured input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UserCmd {
    pub msec: u8,
    pub buttons: u8,
    pub angles: [i16; 3],
    pub forwardmove: i16,
    pub sidemove: i16,
    pub upmove: i16,
    pub impulse: u8,
    pub lightlevel: u8,
}

// ============================================================
// Collision oracle results
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CPlane {
    pub normal: Vec3,
    pub dist: f32,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct CSurface {
    pub name: String,
    pub flags: i32,
    pub value: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Trace {
    /// if true, plane is not valid
    pub allsolid: bool,
    /// if true, the initial point was in a solid area
    pub startsolid: bool,
    /// time completed, 1.0 = didn't hit anything
    pub fraction: f32,
    pub endpos: Vec3,
    pub plane: CPlane,
    pub surface: Option<CSurface>,
    pub contents: i32,
    /// entity the trace stopped on, if any
    pub ent: Option<i32>,
}

impl Trace {
    /// An unobstructed trace that reached `end`.
    pub fn clear(end: Vec3) -> Self {
        Self {
            allsolid: false,
            startsolid: false,
            fraction: 1.0,
            endpos: end,
            plane: CPlane::default(),
            surface: None,
            contents: 0,
            ent: None,
        }
    }
}

// ============================================================
// Networked entity and player state
// ============================================================

/// One networked object's snapshot. Only ever produced by copying a base
/// state and overwriting the fields a delta carries.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EntityState {
    pub number: i32,
    pub origin: Vec3,
    pub angles: Vec3,
    /// for lerping, teleport anchor and beam endpoints
    pub old_origin: Vec3,
    pub modelindex: i32,
    pub modelindex2: i32,
    pub modelindex3: i32,
    pub modelindex4: i32,
    pub frame: i32,
    pub skinnum: i32,
    pub effects: u32,
    pub renderfx: i32,
    /// encoded bbox for prediction clipping
    pub solid: i32,
    pub sound: i32,
    /// one-shot, cleared on every delta that does not resend it
    pub event: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlayerState {
    pub pmove: PmoveState,
    pub viewangles: Vec3,
    pub viewoffset: Vec3,
    pub kick_angles: Vec3,
    pub gunangles: Vec3,
    pub gunoffset: Vec3,
    pub gunindex: i32,
    pub gunframe: i32,
    pub blend: [f32; 4],
    pub fov: f32,
    pub rdflags: i32,
    pub stats: [i16; MAX_STATS],
}

impl Default for PlayerState {
    fn default() -> Self {
        Self {
            pmove: PmoveState::default(),
            viewangles: [0.0; 3],
            viewoffset: [0.0; 3],
            kick_angles: [0.0; 3],
            gunangles: [0.0; 3],
            gunoffset: [0.0; 3],
            gunindex: 0,
            gunframe: 0,
            blend: [0.0; 4],
            fov: 0.0,
            rdflags: 0,
            stats: [0; MAX_STATS],
        }
    }
}
