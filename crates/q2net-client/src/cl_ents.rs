// cl_ents.rs -- entity and frame parsing

use q2net_common::cvar::CvarContext;
use q2net_common::msg::MsgReader;
use q2net_common::q_shared::{
    EntityState, PlayerState, PmFlags, PmType, EV_OTHER_TELEPORT, EV_PLAYER_TELEPORT, MAX_EDICTS,
    MAX_STATS,
};
use q2net_common::qcommon::{EntityBits, PlayerStateBits, SvcOps, SERVER_FRAMETIME_MS};

use crate::cl_parse::{ClientCallbacks, ParseError};
use crate::cl_pred::check_prediction_error;
use crate::client::{ClientState, ClientStatic, ConnState, Frame};

// =========================================================================
// ENTITY DELTAS
// =========================================================================

/// Reads the variable-width change mask and the entity number it belongs to.
pub fn parse_entity_bits(msg: &mut MsgReader<'_>) -> (i32, EntityBits) {
    let mut total = msg.read_byte() as u32 & 0xff;
    if total & EntityBits::MOREBITS1.bits() != 0 {
        total |= (msg.read_byte() as u32 & 0xff) << 8;
    }
    if total & EntityBits::MOREBITS2.bits() != 0 {
        total |= (msg.read_byte() as u32 & 0xff) << 16;
    }
    if total & EntityBits::MOREBITS3.bits() != 0 {
        total |= (msg.read_byte() as u32 & 0xff) << 24;
    }
    let bits = EntityBits::from_bits_retain(total);

    let number = if bits.contains(EntityBits::NUMBER16) {
        msg.read_short()
    } else {
        msg.read_byte()
    };
    (number, bits)
}

/// Width of a field that can be sent as a byte, a short, or both flags
/// together meaning a full long.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldWidth {
    Byte,
    Short,
    Long,
}

impl FieldWidth {
    fn select(bits: EntityBits, byte: EntityBits, short: EntityBits) -> Option<FieldWidth> {
        match (bits.contains(byte), bits.contains(short)) {
            (true, true) => Some(FieldWidth::Long),
            (true, false) => Some(FieldWidth::Byte),
            (false, true) => Some(FieldWidth::Short),
            (false, false) => None,
        }
    }

    fn read(self, msg: &mut MsgReader<'_>) -> i32 {
        match self {
            FieldWidth::Byte => msg.read_byte(),
            FieldWidth::Short => msg.read_short(),
            FieldWidth::Long => msg.read_long(),
        }
    }
}

/// Builds the state `number` reaches from `from` with the fields in `bits`
/// replaced from the message.
pub fn parse_delta(
    from: &EntityState,
    number: i32,
    bits: EntityBits,
    msg: &mut MsgReader<'_>,
) -> EntityState {
    let mut to = EntityState {
        number,
        old_origin: from.origin,
        ..*from
    };

    if bits.contains(EntityBits::MODEL) {
        to.modelindex = msg.read_byte();
    }
    if bits.contains(EntityBits::MODEL2) {
        to.modelindex2 = msg.read_byte();
    }
    if bits.contains(EntityBits::MODEL3) {
        to.modelindex3 = msg.read_byte();
    }
    if bits.contains(EntityBits::MODEL4) {
        to.modelindex4 = msg.read_byte();
    }

    if bits.contains(EntityBits::FRAME8) {
        to.frame = msg.read_byte();
    }
    if bits.contains(EntityBits::FRAME16) {
        to.frame = msg.read_short();
    }

    if let Some(width) = FieldWidth::select(bits, EntityBits::SKIN8, EntityBits::SKIN16) {
        to.skinnum = width.read(msg);
    }
    if let Some(width) = FieldWidth::select(bits, EntityBits::EFFECTS8, EntityBits::EFFECTS16) {
        to.effects = width.read(msg) as u32;
    }
    if let Some(width) = FieldWidth::select(bits, EntityBits::RENDERFX8, EntityBits::RENDERFX16) {
        to.renderfx = width.read(msg);
    }

    if bits.contains(EntityBits::ORIGIN1) {
        to.origin[0] = msg.read_coord();
    }
    if bits.contains(EntityBits::ORIGIN2) {
        to.origin[1] = msg.read_coord();
    }
    if bits.contains(EntityBits::ORIGIN3) {
        to.origin[2] = msg.read_coord();
    }

    if bits.contains(EntityBits::ANGLE1) {
        to.angles[0] = msg.read_angle();
    }
    if bits.contains(EntityBits::ANGLE2) {
        to.angles[1] = msg.read_angle();
    }
    if bits.contains(EntityBits::ANGLE3) {
        to.angles[2] = msg.read_angle();
    }

    if bits.contains(EntityBits::OLDORIGIN) {
        to.old_origin = msg.read_pos();
    }

    if bits.contains(EntityBits::SOUND) {
        to.sound = msg.read_byte();
    }

    to.event = if bits.contains(EntityBits::EVENT) {
        msg.read_byte()
    } else {
        0
    };

    if bits.contains(EntityBits::SOLID) {
        to.solid = msg.read_short();
    }

    to
}

/// Decodes one entity of the frame being built, appends it to the ring and
/// updates the entity's current/previous pair.
fn delta_entity(
    cl: &mut ClientState,
    frame: &mut Frame,
    newnum: i32,
    old: &EntityState,
    bits: EntityBits,
    msg: &mut MsgReader<'_>,
) {
    let state = parse_delta(old, newnum, bits, msg);
    cl.ring.push(state);
    frame.num_entities += 1;

    let ent = &mut cl.entities[newnum as usize];

    // some data changes will force no lerping
    if state.modelindex != ent.current.modelindex
        || state.modelindex2 != ent.current.modelindex2
        || state.modelindex3 != ent.current.modelindex3
        || state.modelindex4 != ent.current.modelindex4
        || (state.origin[0] - ent.current.origin[0]).abs() > 512.0
        || (state.origin[1] - ent.current.origin[1]).abs() > 512.0
        || (state.origin[2] - ent.current.origin[2]).abs() > 512.0
        || state.event == EV_PLAYER_TELEPORT
        || state.event == EV_OTHER_TELEPORT
    {
        ent.serverframe = -99;
    }

    if ent.serverframe != frame.serverframe.wrapping_sub(1) {
        // wasn't in last update, so initialize some things
        ent.trailcount = 1024; // for diminishing rocket / grenade trails
        // duplicate the current state so lerping doesn't hurt anything
        ent.prev = state;
        if state.event == EV_OTHER_TELEPORT {
            ent.prev.origin = state.origin;
            ent.lerp_origin = state.origin;
        } else {
            ent.prev.origin = state.old_origin;
            ent.lerp_origin = state.old_origin;
        }
    } else {
        // shuffle the last state to previous
        ent.prev = ent.current;
    }

    ent.serverframe = frame.serverframe;
    ent.current = state;
}

// =========================================================================
// PACKET ENTITIES
// =========================================================================

/// Walks the entities of the frame being deltaed from, in ascending number.
/// An exhausted or absent old frame simply has no next entity.
#[derive(Debug, Clone)]
struct OldCursor {
    next: usize,
    end: usize,
    current: Option<EntityState>,
}

impl OldCursor {
    fn new(old: Option<&Frame>, cl: &ClientState) -> Self {
        let mut cursor = match old {
            Some(frame) => OldCursor {
                next: frame.parse_entities,
                end: frame.parse_entities + frame.num_entities,
                current: None,
            },
            None => OldCursor {
                next: 0,
                end: 0,
                current: None,
            },
        };
        cursor.advance(cl);
        cursor
    }

    /// Number of the next unconsumed old entity.
    fn number(&self) -> Option<i32> {
        self.current.map(|s| s.number)
    }

    /// Loads the next old entity. Must run before the ring is written past it.
    fn advance(&mut self, cl: &ClientState) {
        self.current = if self.next < self.end {
            let state = *cl.ring.get(self.next);
            self.next += 1;
            Some(state)
        } else {
            None
        };
    }
}

/// An old entity the message did not mention: carry it forward unchanged.
fn carry_forward(
    cl: &mut ClientState,
    frame: &mut Frame,
    old: &mut OldCursor,
    msg: &mut MsgReader<'_>,
    shownet: i32,
) {
    if let Some(state) = old.current {
        if shownet == 3 {
            log::trace!("   unchanged: {}", state.number);
        }
        delta_entity(cl, frame, state.number, &state, EntityBits::empty(), msg);
        old.advance(cl);
    }
}

/// Merges the incoming entity deltas with the entities of `oldframe` into
/// `newframe`'s slice of the ring.
pub fn parse_packet_entities(
    cl: &mut ClientState,
    oldframe: Option<&Frame>,
    newframe: &mut Frame,
    msg: &mut MsgReader<'_>,
    shownet: i32,
) -> Result<(), ParseError> {
    newframe.parse_entities = cl.ring.write_cursor();
    newframe.num_entities = 0;

    // delta from the entities present in oldframe
    let mut old = OldCursor::new(oldframe, cl);

    loop {
        let (newnum, bits) = parse_entity_bits(msg);
        if msg.overflowed() {
            return Err(ParseError::BadRead("packet entities"));
        }
        if newnum < 0 || newnum as usize >= MAX_EDICTS {
            return Err(ParseError::BadEntityNumber(newnum));
        }
        if newnum == 0 {
            break;
        }

        while old.number().is_some_and(|oldnum| oldnum < newnum) {
            // one or more entities from the old packet are unchanged
            carry_forward(cl, newframe, &mut old, msg, shownet);
        }

        if bits.contains(EntityBits::REMOVE) {
            // the entity present in oldframe is not in the current frame
            if shownet == 3 {
                log::trace!("   remove: {}", newnum);
            }
            if old.number() != Some(newnum) {
                log::debug!("U_REMOVE: oldnum != newnum");
            }
            old.advance(cl);
            continue;
        }

        match old.current {
            Some(oldstate) if oldstate.number == newnum => {
                // delta from previous state
                if shownet == 3 {
                    log::trace!("   delta: {}", newnum);
                }
                delta_entity(cl, newframe, newnum, &oldstate, bits, msg);
                old.advance(cl);
            }
            _ => {
                // delta from baseline
                if shownet == 3 {
                    log::trace!("   baseline: {}", newnum);
                }
                let baseline = cl.entities[newnum as usize].baseline;
                delta_entity(cl, newframe, newnum, &baseline, bits, msg);
            }
        }
    }

    // any remaining entities in the old frame are copied over
    while old.current.is_some() {
        carry_forward(cl, newframe, &mut old, msg, shownet);
    }

    Ok(())
}

// =========================================================================
// PLAYER STATE
// =========================================================================

fn read_offset(msg: &mut MsgReader<'_>) -> [f32; 3] {
    [
        msg.read_char() as f32 * 0.25,
        msg.read_char() as f32 * 0.25,
        msg.read_char() as f32 * 0.25,
    ]
}

/// Decodes a player state against `old`, or against the zero state for an
/// uncompressed frame.
pub fn parse_playerstate(
    old: Option<&PlayerState>,
    msg: &mut MsgReader<'_>,
    attractloop: bool,
) -> PlayerState {
    // clear to old value before delta parsing
    let mut state = old.cloned().unwrap_or_default();

    let flags = PlayerStateBits::from_bits_retain(msg.read_short() as u16);

    // parse the movement state
    if flags.contains(PlayerStateBits::M_TYPE) {
        state.pmove.pm_type = PmType::from_wire(msg.read_byte());
    }

    if flags.contains(PlayerStateBits::M_ORIGIN) {
        for axis in state.pmove.origin.iter_mut() {
            *axis = msg.read_short() as i16;
        }
    }

    if flags.contains(PlayerStateBits::M_VELOCITY) {
        for axis in state.pmove.velocity.iter_mut() {
            *axis = msg.read_short() as i16;
        }
    }

    if flags.contains(PlayerStateBits::M_TIME) {
        state.pmove.pm_time = msg.read_byte() as u8;
    }

    if flags.contains(PlayerStateBits::M_FLAGS) {
        state.pmove.pm_flags = PmFlags::from_bits_retain(msg.read_byte() as u8);
    }

    if flags.contains(PlayerStateBits::M_GRAVITY) {
        state.pmove.gravity = msg.read_short() as i16;
    }

    if flags.contains(PlayerStateBits::M_DELTA_ANGLES) {
        for axis in state.pmove.delta_angles.iter_mut() {
            *axis = msg.read_short() as i16;
        }
    }

    if attractloop {
        state.pmove.pm_type = PmType::Freeze; // demo playback
    }

    // parse the rest of the player state
    if flags.contains(PlayerStateBits::VIEWOFFSET) {
        state.viewoffset = read_offset(msg);
    }

    if flags.contains(PlayerStateBits::VIEWANGLES) {
        state.viewangles = [msg.read_angle16(), msg.read_angle16(), msg.read_angle16()];
    }

    if flags.contains(PlayerStateBits::KICKANGLES) {
        state.kick_angles = read_offset(msg);
    }

    if flags.contains(PlayerStateBits::WEAPONINDEX) {
        state.gunindex = msg.read_byte();
    }

    if flags.contains(PlayerStateBits::WEAPONFRAME) {
        state.gunframe = msg.read_byte();
        state.gunoffset = read_offset(msg);
        state.gunangles = read_offset(msg);
    }

    if flags.contains(PlayerStateBits::BLEND) {
        for c in state.blend.iter_mut() {
            *c = msg.read_byte() as f32 / 255.0;
        }
    }

    if flags.contains(PlayerStateBits::FOV) {
        state.fov = msg.read_byte() as f32;
    }

    if flags.contains(PlayerStateBits::RDFLAGS) {
        state.rdflags = msg.read_byte();
    }

    // parse stats
    let statbits = msg.read_long() as u32;
    for i in 0..MAX_STATS {
        if statbits & (1 << i) != 0 {
            state.stats[i] = msg.read_short() as i16;
        }
    }

    state
}

// =========================================================================
// FRAME
// =========================================================================

/// Reports every entity event carried by `frame`.
pub fn fire_entity_events(cl: &ClientState, frame: &Frame, callbacks: &mut dyn ClientCallbacks) {
    for state in cl.frame_entities(frame) {
        if state.event != 0 {
            callbacks.entity_event(state);
        }
    }
}

/// Reads the sub-message opcode a frame requires next.
fn expect_op(
    msg: &mut MsgReader<'_>,
    expected: SvcOps,
    shownet: i32,
) -> Result<(), ParseError> {
    let cmd = msg.read_byte();
    if shownet >= 2 {
        if let Some(op) = SvcOps::from_byte(cmd) {
            log::trace!("{:3}:{}", msg.readcount() - 1, op.name());
        }
    }
    if cmd != expected as i32 {
        return Err(ParseError::FrameSequence {
            expected: expected.name(),
            got: cmd,
        });
    }
    Ok(())
}

pub fn parse_frame(
    cl: &mut ClientState,
    cls: &mut ClientStatic,
    cvars: &CvarContext,
    msg: &mut MsgReader<'_>,
    callbacks: &mut dyn ClientCallbacks,
) -> Result<(), ParseError> {
    let shownet = cvars.value("cl_shownet") as i32;

    let serverframe = msg.read_long();
    let deltaframe = msg.read_long();
    let mut frame = Frame {
        serverframe,
        deltaframe,
        servertime: serverframe.wrapping_mul(SERVER_FRAMETIME_MS),
        ..Frame::default()
    };
    cl.surpresscount = msg.read_byte();

    if shownet == 3 {
        log::trace!("   frame:{}  delta:{}", serverframe, deltaframe);
    }

    // If the frame is delta compressed from data that we no longer have
    // available, we must suck up the rest of the frame, but not use it,
    // then ask for a non-compressed message.
    let old: Option<Frame> = if deltaframe <= 0 {
        frame.valid = true; // uncompressed frame
        None
    } else {
        let slot = cl.frames.slot(deltaframe);
        if slot.serverframe != deltaframe {
            // The frame that the server did the delta from
            // is too old, so we can't reconstruct it properly.
            log::debug!("Delta frame too old.");
            None
        } else if !cl.ring.within_window(slot.parse_entities) {
            log::debug!("Delta parse_entities too old.");
            None
        } else {
            if !slot.valid {
                log::debug!("Delta from invalid frame {}.", deltaframe);
            }
            frame.valid = true; // valid delta parse
            Some(slot.clone())
        }
    };

    // clamp time
    if cl.time > frame.servertime {
        cl.time = frame.servertime;
    } else if cl.time < frame.servertime.wrapping_sub(SERVER_FRAMETIME_MS) {
        cl.time = frame.servertime.wrapping_sub(SERVER_FRAMETIME_MS);
    }

    // read areabits
    let len = msg.read_byte().max(0) as usize;
    frame.areabits = msg.read_data(len).to_vec();

    // read playerinfo
    expect_op(msg, SvcOps::PlayerInfo, shownet)?;
    let attractloop = cl.attractloop;
    frame.playerstate = parse_playerstate(old.as_ref().map(|f| &f.playerstate), msg, attractloop);

    // read packet entities
    expect_op(msg, SvcOps::PacketEntities, shownet)?;
    parse_packet_entities(cl, old.as_ref(), &mut frame, msg, shownet)?;

    if msg.overflowed() {
        return Err(ParseError::BadRead("frame"));
    }

    // save the frame off in the backup array for later delta comparisons
    cl.frames.store(frame.clone());
    cl.frame = frame;
    callbacks.frame_parsed(&cl.frame);

    if !cl.frame.valid {
        return Ok(());
    }

    // getting a valid frame message ends the connection process
    if cls.state != ConnState::Active && cls.state.transition(ConnState::Active) {
        let origin = cl.frame.playerstate.pmove.origin;
        cl.predicted_origin = [
            origin[0] as f32 * 0.125,
            origin[1] as f32 * 0.125,
            origin[2] as f32 * 0.125,
        ];
        cl.predicted_angles = cl.frame.playerstate.viewangles;
    }

    // fire entity events
    let current = cl.frame.clone();
    fire_entity_events(cl, &current, callbacks);
    check_prediction_error(cl, cls, cvars);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cl_parse::NullCallbacks;
    use proptest::prelude::*;
    use q2net_common::msg::{entity_delta_bits, with_morebits, MsgWriter};
    use q2net_common::qcommon::{UPDATE_BACKUP, MAX_PARSE_ENTITIES};

    // -------------------------------------------------------
    // Helpers
    // -------------------------------------------------------

    fn ent(number: i32, origin: [f32; 3]) -> EntityState {
        EntityState {
            number,
            origin,
            modelindex: 1,
            ..Default::default()
        }
    }

    fn connected() -> (ClientState, ClientStatic, CvarContext) {
        let mut cls = ClientStatic::new();
        cls.state = ConnState::Connected;
        (ClientState::new(), cls, CvarContext::new())
    }

    /// Frame header plus an empty player state, ready for entity records.
    fn frame_header(w: &mut MsgWriter, serverframe: i32, deltaframe: i32) {
        w.write_long(serverframe);
        w.write_long(deltaframe);
        w.write_byte(0); // surpresscount
        w.write_byte(1); // areabits
        w.write_byte(0xff);
        w.write_byte(SvcOps::PlayerInfo as i32);
        w.write_short(0);
        w.write_long(0);
        w.write_byte(SvcOps::PacketEntities as i32);
    }

    fn run_frame(
        cl: &mut ClientState,
        cls: &mut ClientStatic,
        cvars: &CvarContext,
        w: &MsgWriter,
    ) -> Result<(), ParseError> {
        let mut msg = MsgReader::new(w.as_slice());
        parse_frame(cl, cls, cvars, &mut msg, &mut NullCallbacks)
    }

    fn numbers(cl: &ClientState) -> Vec<i32> {
        cl.frame_entities(&cl.frame).map(|s| s.number).collect()
    }

    // -------------------------------------------------------
    // Entity delta codec
    // -------------------------------------------------------

    #[test]
    fn test_parse_entity_bits_widths() {
        let mut w = MsgWriter::new();
        let from = EntityState::default();
        let to = EntityState {
            number: 300,
            skinnum: 0x1_0000,
            ..Default::default()
        };
        let sent = w.write_delta_entity(&from, &to, false, false).unwrap();

        let mut msg = MsgReader::new(w.as_slice());
        let (number, bits) = parse_entity_bits(&mut msg);
        assert_eq!(number, 300);
        assert_eq!(bits, sent);
        assert!(bits.contains(EntityBits::SKIN8 | EntityBits::SKIN16));
    }

    #[test]
    fn test_parse_delta_tiered_fields() {
        let from = EntityState {
            number: 9,
            ..Default::default()
        };
        let to = EntityState {
            number: 9,
            skinnum: 0x12345,
            effects: 0x8001,
            renderfx: 40,
            frame: 300,
            ..Default::default()
        };
        let mut w = MsgWriter::new();
        w.write_delta_entity(&from, &to, false, false);

        let mut msg = MsgReader::new(w.as_slice());
        let (number, bits) = parse_entity_bits(&mut msg);
        let got = parse_delta(&from, number, bits, &mut msg);
        assert_eq!(got.skinnum, 0x12345, "both skin bits mean a long");
        assert_eq!(got.effects, 0x8001);
        assert_eq!(got.renderfx, 40);
        assert_eq!(got.frame, 300);
        assert_eq!(msg.remaining(), 0);
    }

    #[test]
    fn test_parse_delta_resets_event_and_defaults_old_origin() {
        let from = EntityState {
            number: 4,
            origin: [10.0, 20.0, 30.0],
            event: 2,
            ..Default::default()
        };
        let data = [0u8, 4];
        let mut msg = MsgReader::new(&data);
        let (number, bits) = parse_entity_bits(&mut msg);
        let got = parse_delta(&from, number, bits, &mut msg);
        assert_eq!(got.event, 0, "events are one-shot");
        assert_eq!(got.old_origin, [10.0, 20.0, 30.0]);
        assert_eq!(got.origin, from.origin);
    }

    #[test]
    fn test_parse_delta_explicit_old_origin() {
        let from = ent(4, [10.0, 0.0, 0.0]);
        let to = EntityState {
            old_origin: [1.0, 2.0, 3.0],
            ..from
        };
        let mut w = MsgWriter::new();
        w.write_delta_entity(&from, &to, false, true);
        let mut msg = MsgReader::new(w.as_slice());
        let (number, bits) = parse_entity_bits(&mut msg);
        let got = parse_delta(&from, number, bits, &mut msg);
        assert_eq!(got.old_origin, [1.0, 2.0, 3.0]);
    }

    fn arb_entity() -> impl Strategy<Value = EntityState> {
        (
            (1i32..1024, -4096i32..4096, -4096i32..4096, -4096i32..4096),
            (0i32..256, -128i32..128),
            (0i32..4, 0i32..256, 0i32..256),
            (prop_oneof![0i32..0x8000, 0x10000i32..0x20000], 0u32..0x10_0000, 0i32..0x10000),
            (0i32..2, 0i32..256, 0i32..8, 0i32..0x7fff),
            (-4096i32..4096, -4096i32..4096, -4096i32..4096),
        )
            .prop_map(|(n, a, m, s, o, old)| {
                let (number, x, y, z) = n;
                let (yaw, roll) = a;
                let (model2, frame, model) = m;
                let (skinnum, effects, renderfx) = s;
                let (has_old, sound, event, solid) = o;
                let origin = [x as f32 * 0.125, y as f32 * 0.125, z as f32 * 0.125];
                EntityState {
                    number,
                    origin,
                    angles: [0.0, yaw as f32 * (360.0 / 256.0), roll as f32 * (360.0 / 256.0)],
                    old_origin: if has_old == 1 {
                        [old.0 as f32 * 0.125, old.1 as f32 * 0.125, old.2 as f32 * 0.125]
                    } else {
                        origin
                    },
                    modelindex: model,
                    modelindex2: model2,
                    frame,
                    skinnum,
                    effects,
                    renderfx,
                    sound,
                    event,
                    solid,
                    ..Default::default()
                }
            })
    }

    proptest! {
        #[test]
        fn prop_delta_mask_round_trips(from in arb_entity(), to in arb_entity(), newentity in any::<bool>()) {
            let to = EntityState { number: from.number, ..to };
            let expected = entity_delta_bits(&from, &to, newentity);
            prop_assume!(!expected.is_empty());

            let mut w = MsgWriter::new();
            let sent = w.write_delta_entity(&from, &to, false, newentity).unwrap();
            let mut msg = MsgReader::new(w.as_slice());
            let (number, bits) = parse_entity_bits(&mut msg);
            prop_assert_eq!(number, from.number);
            prop_assert_eq!(bits, sent);

            let number16 = if number >= 256 { EntityBits::NUMBER16 } else { EntityBits::empty() };
            prop_assert_eq!(bits, with_morebits(expected | number16));

            let decoded = parse_delta(&from, number, bits, &mut msg);
            prop_assert_eq!(msg.remaining(), 0);
            prop_assert_eq!(entity_delta_bits(&from, &decoded, newentity), expected);
        }
    }

    // -------------------------------------------------------
    // Merge
    // -------------------------------------------------------

    #[test]
    fn test_scenario_a_baseline_then_angle_delta() {
        let (mut cl, mut cls, cvars) = connected();
        cl.entities[5].baseline = ent(5, [100.0, 0.0, 0.0]);

        let mut w = MsgWriter::new();
        frame_header(&mut w, 1, 0);
        let changed = EntityState {
            angles: [0.0, 0.0, 45.0],
            ..cl.entities[5].baseline
        };
        w.write_delta_entity(&cl.entities[5].baseline, &changed, false, false);
        w.write_entity_terminator();

        run_frame(&mut cl, &mut cls, &cvars, &w).unwrap();
        let got = *cl.ring.get(cl.frame.parse_entities);
        assert_eq!(got.number, 5);
        assert_eq!(got.origin, [100.0, 0.0, 0.0]);
        assert_eq!(got.angles[2], 45.0);
        assert_eq!(got.old_origin, [100.0, 0.0, 0.0]);
        assert_eq!(cl.entities[5].current, got);
    }

    #[test]
    fn test_extreme_frame_numbers_do_not_overflow() {
        // i32::MIN itself, and a frame whose servertime wraps onto i32::MIN
        for serverframe in [i32::MIN, 1 << 29] {
            let (mut cl, mut cls, cvars) = connected();
            cl.entities[5].baseline = ent(5, [100.0, 0.0, 0.0]);

            let mut w = MsgWriter::new();
            frame_header(&mut w, serverframe, 0);
            let b = cl.entities[5].baseline;
            w.write_delta_entity(&b, &b, true, false);
            w.write_entity_terminator();

            run_frame(&mut cl, &mut cls, &cvars, &w).unwrap();
            assert!(cl.frame.valid);
            assert_eq!(cl.frame.serverframe, serverframe);
            assert_eq!(cl.frame.num_entities, 1);
            assert_eq!(cl.entities[5].serverframe, serverframe);
            assert_eq!(cl.entities[5].trailcount, 1024, "not in the previous frame");
        }
    }

    #[test]
    fn test_merge_carries_forward_removes_and_adds() {
        let (mut cl, mut cls, cvars) = connected();
        for n in [1, 2, 3, 9] {
            cl.entities[n as usize].baseline = ent(n, [n as f32 * 10.0, 0.0, 0.0]);
        }

        // frame 1: 1, 2, 3 from baselines
        let mut w = MsgWriter::new();
        frame_header(&mut w, 1, 0);
        for n in [1, 2, 3] {
            let b = cl.entities[n].baseline;
            w.write_delta_entity(&b, &b, true, false);
        }
        w.write_entity_terminator();
        run_frame(&mut cl, &mut cls, &cvars, &w).unwrap();
        assert_eq!(numbers(&cl), vec![1, 2, 3]);

        // frame 2 from 1: move 2, remove 3, add 9; 1 is unmentioned
        let mut w = MsgWriter::new();
        frame_header(&mut w, 2, 1);
        let old2 = cl.entities[2].current;
        let moved = EntityState {
            origin: [25.0, 5.0, 0.0],
            ..old2
        };
        w.write_delta_entity(&old2, &moved, false, false);
        w.write_entity_remove(3);
        let b9 = cl.entities[9].baseline;
        w.write_delta_entity(&b9, &b9, true, true);
        w.write_entity_terminator();
        run_frame(&mut cl, &mut cls, &cvars, &w).unwrap();

        assert!(cl.frame.valid);
        assert_eq!(numbers(&cl), vec![1, 2, 9]);
        let states: Vec<_> = cl.frame_entities(&cl.frame).copied().collect();
        let old1 = cl.frames.get(1).map(|f| *cl.ring.get(f.parse_entities)).unwrap();
        assert_eq!(
            EntityState { old_origin: old1.old_origin, ..states[0] },
            old1,
            "carry-forward is field-for-field identical"
        );
        assert_eq!(states[1].origin, [25.0, 5.0, 0.0]);
        assert_eq!(states[1].old_origin, [20.0, 0.0, 0.0]);
        assert_eq!(states[2].origin, [90.0, 0.0, 0.0]);
        assert_eq!(cl.entities[2].prev.origin, [20.0, 0.0, 0.0]);
    }

    #[test]
    fn test_merge_drains_remaining_old_entities() {
        let (mut cl, mut cls, cvars) = connected();
        for n in [4, 7, 8] {
            cl.entities[n as usize].baseline = ent(n, [0.0; 3]);
        }
        let mut w = MsgWriter::new();
        frame_header(&mut w, 10, 0);
        for n in [4, 7, 8] {
            let b = cl.entities[n].baseline;
            w.write_delta_entity(&b, &b, true, false);
        }
        w.write_entity_terminator();
        run_frame(&mut cl, &mut cls, &cvars, &w).unwrap();

        let mut w = MsgWriter::new();
        frame_header(&mut w, 11, 10);
        w.write_entity_terminator();
        run_frame(&mut cl, &mut cls, &cvars, &w).unwrap();
        assert_eq!(numbers(&cl), vec![4, 7, 8]);
        assert_eq!(cl.frame.num_entities, 3);
    }

    #[test]
    fn test_entity_reappearing_resets_lerp() {
        let (mut cl, mut cls, cvars) = connected();
        cl.entities[6].baseline = ent(6, [0.0, 0.0, 0.0]);
        let mut w = MsgWriter::new();
        frame_header(&mut w, 1, 0);
        let b = cl.entities[6].baseline;
        w.write_delta_entity(&b, &b, true, false);
        w.write_entity_terminator();
        run_frame(&mut cl, &mut cls, &cvars, &w).unwrap();
        assert_eq!(cl.entities[6].serverframe, 1);
        assert_eq!(cl.entities[6].trailcount, 1024);

        // frame 3 skips 2, so 6 was not in the previous frame
        let far = EntityState {
            origin: [600.0, 0.0, 0.0],
            ..b
        };
        let mut w = MsgWriter::new();
        frame_header(&mut w, 3, 0);
        w.write_delta_entity(&b, &far, false, false);
        w.write_entity_terminator();
        run_frame(&mut cl, &mut cls, &cvars, &w).unwrap();
        let e = cl.entities[6];
        assert_eq!(e.serverframe, 3);
        assert_eq!(e.prev.origin, [0.0, 0.0, 0.0], "prev snaps to old_origin");
        assert_eq!(e.lerp_origin, [0.0, 0.0, 0.0]);
        assert_eq!(e.current.origin, [600.0, 0.0, 0.0]);
    }

    #[test]
    fn test_other_teleport_snaps_prev_to_new_origin() {
        let (mut cl, mut cls, cvars) = connected();
        cl.entities[6].baseline = ent(6, [0.0, 0.0, 0.0]);
        let b = cl.entities[6].baseline;
        let tele = EntityState {
            origin: [64.0, 64.0, 0.0],
            event: EV_OTHER_TELEPORT,
            ..b
        };
        let mut w = MsgWriter::new();
        frame_header(&mut w, 1, 0);
        w.write_delta_entity(&b, &tele, false, false);
        w.write_entity_terminator();
        run_frame(&mut cl, &mut cls, &cvars, &w).unwrap();
        let e = cl.entities[6];
        assert_eq!(e.prev.origin, [64.0, 64.0, 0.0]);
        assert_eq!(e.lerp_origin, [64.0, 64.0, 0.0]);
    }

    #[test]
    fn test_continuous_entity_shuffles_prev() {
        let (mut cl, mut cls, cvars) = connected();
        cl.entities[2].baseline = ent(2, [0.0; 3]);
        let b = cl.entities[2].baseline;
        let mut w = MsgWriter::new();
        frame_header(&mut w, 1, 0);
        w.write_delta_entity(&b, &b, true, false);
        w.write_entity_terminator();
        run_frame(&mut cl, &mut cls, &cvars, &w).unwrap();

        let step = EntityState {
            origin: [8.0, 0.0, 0.0],
            ..cl.entities[2].current
        };
        let mut w = MsgWriter::new();
        frame_header(&mut w, 2, 1);
        w.write_delta_entity(&cl.entities[2].current, &step, false, false);
        w.write_entity_terminator();
        run_frame(&mut cl, &mut cls, &cvars, &w).unwrap();
        assert_eq!(cl.entities[2].prev.origin, [0.0; 3]);
        assert_eq!(cl.entities[2].current.origin, [8.0, 0.0, 0.0]);
        assert_eq!(cl.entities[2].trailcount, 1024, "trailcount untouched while continuous");
    }

    #[test]
    fn test_bad_entity_number_is_fatal() {
        let (mut cl, mut cls, cvars) = connected();
        let mut w = MsgWriter::new();
        frame_header(&mut w, 1, 0);
        // NUMBER16 | MOREBITS1, then number 2000
        w.write_byte(EntityBits::MOREBITS1.bits() as i32);
        w.write_byte((EntityBits::NUMBER16.bits() >> 8) as i32);
        w.write_short(2000);
        let err = run_frame(&mut cl, &mut cls, &cvars, &w);
        assert_eq!(err, Err(ParseError::BadEntityNumber(2000)));
    }

    #[test]
    fn test_truncated_entity_list_is_fatal() {
        let (mut cl, mut cls, cvars) = connected();
        let mut w = MsgWriter::new();
        frame_header(&mut w, 1, 0);
        w.write_byte(EntityBits::ORIGIN1.bits() as i32);
        let err = run_frame(&mut cl, &mut cls, &cvars, &w);
        assert!(matches!(err, Err(ParseError::BadRead(_))));
    }

    // -------------------------------------------------------
    // Player state
    // -------------------------------------------------------

    #[test]
    fn test_parse_playerstate_fields() {
        let mut w = MsgWriter::new();
        let flags = PlayerStateBits::M_ORIGIN
            | PlayerStateBits::M_FLAGS
            | PlayerStateBits::VIEWANGLES
            | PlayerStateBits::VIEWOFFSET
            | PlayerStateBits::WEAPONFRAME
            | PlayerStateBits::BLEND
            | PlayerStateBits::FOV;
        w.write_short(flags.bits() as i32);
        w.write_short(80);
        w.write_short(-16);
        w.write_short(200);
        w.write_byte(PmFlags::ON_GROUND.bits() as i32);
        w.write_char(88); // viewoffset * 4
        w.write_char(0);
        w.write_char(-8);
        w.write_angle16(90.0);
        w.write_angle16(0.0);
        w.write_angle16(0.0);
        w.write_byte(3); // gunframe
        for _ in 0..6 {
            w.write_char(4);
        }
        for c in [255, 0, 0, 51] {
            w.write_byte(c);
        }
        w.write_byte(90);
        w.write_long(((1u32 << 1) | (1u32 << 31)) as i32);
        w.write_short(100);
        w.write_short(-5);

        let mut msg = MsgReader::new(w.as_slice());
        let ps = parse_playerstate(None, &mut msg, false);
        assert_eq!(ps.pmove.origin, [80, -16, 200]);
        assert_eq!(ps.pmove.pm_flags, PmFlags::ON_GROUND);
        assert_eq!(ps.viewoffset, [22.0, 0.0, -2.0]);
        assert!((ps.viewangles[0] - 90.0).abs() < 1e-3);
        assert_eq!(ps.gunframe, 3);
        assert_eq!(ps.gunoffset, [1.0; 3]);
        assert_eq!(ps.gunangles, [1.0; 3]);
        assert_eq!(ps.blend[0], 1.0);
        assert!((ps.blend[3] - 0.2).abs() < 1e-6);
        assert_eq!(ps.fov, 90.0);
        assert_eq!(ps.stats[1], 100);
        assert_eq!(ps.stats[31], -5);
        assert_eq!(msg.remaining(), 0);
    }

    #[test]
    fn test_parse_playerstate_deltas_from_old_and_freezes_demos() {
        let mut old = PlayerState::default();
        old.pmove.origin = [1, 2, 3];
        old.fov = 90.0;
        let data = [0u8, 0, 0, 0, 0, 0];
        let mut msg = MsgReader::new(&data);
        let ps = parse_playerstate(Some(&old), &mut msg, true);
        assert_eq!(ps.pmove.origin, [1, 2, 3]);
        assert_eq!(ps.fov, 90.0);
        assert_eq!(ps.pmove.pm_type, PmType::Freeze);
    }

    // -------------------------------------------------------
    // Frame validity
    // -------------------------------------------------------

    #[test]
    fn test_scenario_b_skipped_delta_base() {
        let (mut cl, mut cls, cvars) = connected();

        let mut w = MsgWriter::new();
        frame_header(&mut w, 100, 0);
        w.write_entity_terminator();
        run_frame(&mut cl, &mut cls, &cvars, &w).unwrap();
        assert!(cl.frame.valid);
        assert_eq!(cls.state, ConnState::Active);

        let mut w = MsgWriter::new();
        frame_header(&mut w, 101, 100);
        w.write_entity_terminator();
        run_frame(&mut cl, &mut cls, &cvars, &w).unwrap();
        assert!(cl.frame.valid);

        // slot for 100 is reused by 116, so a delta from 100 is gone
        let mut w = MsgWriter::new();
        frame_header(&mut w, 100 + UPDATE_BACKUP as i32, 0);
        w.write_entity_terminator();
        run_frame(&mut cl, &mut cls, &cvars, &w).unwrap();

        let mut w = MsgWriter::new();
        frame_header(&mut w, 117, 100);
        w.write_entity_terminator();
        run_frame(&mut cl, &mut cls, &cvars, &w).unwrap();
        assert!(!cl.frame.valid, "delta base was overwritten");
        assert!(cl.frames.get(117).is_some(), "invalid frames are still stored");
    }

    #[test]
    fn test_delta_from_never_received_frame_is_invalid() {
        let (mut cl, mut cls, cvars) = connected();
        let mut w = MsgWriter::new();
        frame_header(&mut w, 5, 4);
        w.write_entity_terminator();
        run_frame(&mut cl, &mut cls, &cvars, &w).unwrap();
        assert!(!cl.frame.valid);
        assert_eq!(cls.state, ConnState::Connected, "invalid frames do not activate");
    }

    #[test]
    fn test_invalid_frame_consumes_its_entities() {
        let (mut cl, mut cls, cvars) = connected();
        cl.entities[3].baseline = ent(3, [0.0; 3]);
        let b = cl.entities[3].baseline;
        let mut w = MsgWriter::new();
        frame_header(&mut w, 5, 4);
        let moved = EntityState {
            origin: [8.0, 8.0, 8.0],
            ..b
        };
        w.write_delta_entity(&b, &moved, false, false);
        w.write_entity_terminator();
        w.write_byte(SvcOps::Nop as i32);

        let mut msg = MsgReader::new(w.as_slice());
        parse_frame(&mut cl, &mut cls, &cvars, &mut msg, &mut NullCallbacks).unwrap();
        assert_eq!(msg.read_byte(), SvcOps::Nop as i32, "stream stays in sync");
        assert!(!cl.frame.valid);
        assert_eq!(numbers(&cl), vec![3], "decoded against the baseline");
    }

    #[test]
    fn test_delta_from_stale_ring_window_is_invalid() {
        let (mut cl, mut cls, cvars) = connected();
        let mut w = MsgWriter::new();
        frame_header(&mut w, 1, 0);
        w.write_entity_terminator();
        run_frame(&mut cl, &mut cls, &cvars, &w).unwrap();

        for _ in 0..MAX_PARSE_ENTITIES {
            cl.ring.push(EntityState::default());
        }
        let mut w = MsgWriter::new();
        frame_header(&mut w, 2, 1);
        w.write_entity_terminator();
        run_frame(&mut cl, &mut cls, &cvars, &w).unwrap();
        assert!(!cl.frame.valid);
    }

    #[test]
    fn test_frame_requires_playerinfo_then_packetentities() {
        let (mut cl, mut cls, cvars) = connected();
        let mut w = MsgWriter::new();
        w.write_long(1);
        w.write_long(0);
        w.write_byte(0);
        w.write_byte(0);
        w.write_byte(SvcOps::PacketEntities as i32);
        let err = run_frame(&mut cl, &mut cls, &cvars, &w);
        assert_eq!(
            err,
            Err(ParseError::FrameSequence {
                expected: "svc_playerinfo",
                got: SvcOps::PacketEntities as i32
            })
        );

        let mut w = MsgWriter::new();
        w.write_long(1);
        w.write_long(0);
        w.write_byte(0);
        w.write_byte(0);
        w.write_byte(SvcOps::PlayerInfo as i32);
        w.write_short(0);
        w.write_long(0);
        w.write_byte(SvcOps::Nop as i32);
        let err = run_frame(&mut cl, &mut cls, &cvars, &w);
        assert!(matches!(err, Err(ParseError::FrameSequence { expected: "svc_packetentities", .. })));
    }

    #[test]
    fn test_first_valid_frame_seeds_prediction() {
        let (mut cl, mut cls, cvars) = connected();
        let mut w = MsgWriter::new();
        w.write_long(1);
        w.write_long(0);
        w.write_byte(0);
        w.write_byte(0);
        w.write_byte(SvcOps::PlayerInfo as i32);
        w.write_short((PlayerStateBits::M_ORIGIN | PlayerStateBits::VIEWANGLES).bits() as i32);
        w.write_short(80);
        w.write_short(16);
        w.write_short(-8);
        w.write_angle16(0.0);
        w.write_angle16(90.0);
        w.write_angle16(0.0);
        w.write_long(0);
        w.write_byte(SvcOps::PacketEntities as i32);
        w.write_entity_terminator();

        run_frame(&mut cl, &mut cls, &cvars, &w).unwrap();
        assert_eq!(cls.state, ConnState::Active);
        assert_eq!(cl.predicted_origin, [10.0, 2.0, -1.0]);
        assert!((cl.predicted_angles[1] - 90.0).abs() < 1e-3);
        assert_eq!(cl.frame.servertime, 100);
        assert_eq!(cl.frame.areabits, Vec::<u8>::new());
    }

    #[test]
    fn test_entity_events_fire_for_valid_frames() {
        #[derive(Default)]
        struct Events(Vec<(i32, i32)>);
        impl ClientCallbacks for Events {
            fn entity_event(&mut self, ent: &EntityState) {
                self.0.push((ent.number, ent.event));
            }
        }

        let (mut cl, mut cls, cvars) = connected();
        cl.entities[1].baseline = ent(1, [0.0; 3]);
        let b = cl.entities[1].baseline;
        let stepping = EntityState { event: 2, ..b };
        let mut w = MsgWriter::new();
        frame_header(&mut w, 1, 0);
        w.write_delta_entity(&b, &stepping, false, false);
        w.write_entity_terminator();

        let mut events = Events::default();
        let mut msg = MsgReader::new(w.as_slice());
        parse_frame(&mut cl, &mut cls, &cvars, &mut msg, &mut events).unwrap();
        assert_eq!(events.0, vec![(1, 2)]);
    }
}
