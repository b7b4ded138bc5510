// cl_tent.rs — temporary entity payload decoding
//
// The effects themselves belong to the presentation layer. This module only
// consumes each payload in its wire layout and hands the fields over as a
// generic record, so the message cursor stays in sync.

use q2net_common::msg::MsgReader;
use q2net_common::q_shared::Vec3;

use crate::cl_parse::ParseError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum TempEvent {
    Gunshot = 0,
    Blood = 1,
    Blaster = 2,
    Railtrail = 3,
    Shotgun = 4,
    Explosion1 = 5,
    Explosion2 = 6,
    RocketExplosion = 7,
    GrenadeExplosion = 8,
    Sparks = 9,
    Splash = 10,
    Bubbletrail = 11,
    ScreenSparks = 12,
    ShieldSparks = 13,
    BulletSparks = 14,
    LaserSparks = 15,
    ParasiteAttack = 16,
    RocketExplosionWater = 17,
    GrenadeExplosionWater = 18,
    MedicCableAttack = 19,
    BfgExplosion = 20,
    BfgBigexplosion = 21,
    Bosstport = 22,
    BfgLaser = 23,
    GrappleCable = 24,
    WeldingSparks = 25,
    Greenblood = 26,
    Bluehyperblaster = 27,
    PlasmaExplosion = 28,
    TunnelSparks = 29,
    Blaster2 = 30,
    Railtrail2 = 31,
    Flame = 32,
    Lightning = 33,
    Debugtrail = 34,
    PlainExplosion = 35,
    Flashlight = 36,
    Forcewall = 37,
    Heatbeam = 38,
    MonsterHeatbeam = 39,
    Steam = 40,
    Bubbletrail2 = 41,
    Moreblood = 42,
    HeatbeamSparks = 43,
    HeatbeamSteam = 44,
    ChainfistSmoke = 45,
    ElectricSparks = 46,
    TrackerExplosion = 47,
    TeleportEffect = 48,
    DballGoal = 49,
    Widowbeamout = 50,
    Nukeblast = 51,
    Widowsplash = 52,
    Explosion1Big = 53,
    Explosion1Np = 54,
    Flechette = 55,
}

impl TempEvent {
    const ALL: [TempEvent; 56] = [
        TempEvent::Gunshot,
        TempEvent::Blood,
        TempEvent::Blaster,
        TempEvent::Railtrail,
        TempEvent::Shotgun,
        TempEvent::Explosion1,
        TempEvent::Explosion2,
        TempEvent::RocketExplosion,
        TempEvent::GrenadeExplosion,
        TempEvent::Sparks,
        TempEvent::Splash,
        TempEvent::Bubbletrail,
        TempEvent::ScreenSparks,
        TempEvent::ShieldSparks,
        TempEvent::BulletSparks,
        TempEvent::LaserSparks,
        TempEvent::ParasiteAttack,
        TempEvent::RocketExplosionWater,
        TempEvent::GrenadeExplosionWater,
        TempEvent::MedicCableAttack,
        TempEvent::BfgExplosion,
        TempEvent::BfgBigexplosion,
        TempEvent::Bosstport,
        TempEvent::BfgLaser,
        TempEvent::GrappleCable,
        TempEvent::WeldingSparks,
        TempEvent::Greenblood,
        TempEvent::Bluehyperblaster,
        TempEvent::PlasmaExplosion,
        TempEvent::TunnelSparks,
        TempEvent::Blaster2,
        TempEvent::Railtrail2,
        TempEvent::Flame,
        TempEvent::Lightning,
        TempEvent::Debugtrail,
        TempEvent::PlainExplosion,
        TempEvent::Flashlight,
        TempEvent::Forcewall,
        TempEvent::Heatbeam,
        TempEvent::MonsterHeatbeam,
        TempEvent::Steam,
        TempEvent::Bubbletrail2,
        TempEvent::Moreblood,
        TempEvent::HeatbeamSparks,
        TempEvent::HeatbeamSteam,
        TempEvent::ChainfistSmoke,
        TempEvent::ElectricSparks,
        TempEvent::TrackerExplosion,
        TempEvent::TeleportEffect,
        TempEvent::DballGoal,
        TempEvent::Widowbeamout,
        TempEvent::Nukeblast,
        TempEvent::Widowsplash,
        TempEvent::Explosion1Big,
        TempEvent::Explosion1Np,
        TempEvent::Flechette,
    ];

    pub fn from_byte(value: i32) -> Option<TempEvent> {
        usize::try_from(value).ok().and_then(|i| Self::ALL.get(i).copied())
    }
}

/// One field of a temp entity payload, in wire order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Byte,
    Short,
    Long,
    Pos,
    /// index into the shared normal table
    Dir,
}

use Field::*;

/// A decoded temp entity. Positions, directions and the remaining integer
/// fields each keep their wire order.
#[derive(Debug, Clone, PartialEq)]
pub struct TempEntity {
    pub kind: TempEvent,
    pub positions: Vec<Vec3>,
    pub dirs: Vec<u8>,
    pub values: Vec<i32>,
}

impl TempEntity {
    fn new(kind: TempEvent) -> Self {
        Self {
            kind,
            positions: Vec::new(),
            dirs: Vec::new(),
            values: Vec::new(),
        }
    }

    fn read_fields(&mut self, msg: &mut MsgReader<'_>, fields: &[Field]) {
        for field in fields {
            match field {
                Byte => self.values.push(msg.read_byte()),
                Short => self.values.push(msg.read_short()),
                Long => self.values.push(msg.read_long()),
                Pos => self.positions.push(msg.read_pos()),
                Dir => self.dirs.push(msg.read_byte() as u8),
            }
        }
    }
}

fn layout(kind: TempEvent) -> Option<&'static [Field]> {
    use TempEvent as T;
    let fields: &'static [Field] = match kind {
        T::Blood
        | T::Gunshot
        | T::Sparks
        | T::BulletSparks
        | T::ScreenSparks
        | T::ShieldSparks
        | T::Shotgun
        | T::Blaster
        | T::Greenblood
        | T::Blaster2
        | T::Flechette
        | T::HeatbeamSparks
        | T::HeatbeamSteam
        | T::Moreblood
        | T::ElectricSparks => &[Pos, Dir],

        // count, position, direction, color or splash kind
        T::Splash | T::LaserSparks | T::WeldingSparks | T::TunnelSparks => {
            &[Byte, Pos, Dir, Byte]
        }

        T::Bluehyperblaster
        | T::Railtrail
        | T::Bubbletrail
        | T::BfgLaser
        | T::Debugtrail
        | T::Bubbletrail2 => &[Pos, Pos],

        T::Explosion2
        | T::GrenadeExplosion
        | T::GrenadeExplosionWater
        | T::PlasmaExplosion
        | T::Explosion1
        | T::Explosion1Big
        | T::RocketExplosion
        | T::RocketExplosionWater
        | T::Explosion1Np
        | T::BfgExplosion
        | T::BfgBigexplosion
        | T::Bosstport
        | T::PlainExplosion
        | T::ChainfistSmoke
        | T::TrackerExplosion
        | T::TeleportEffect
        | T::DballGoal
        | T::Nukeblast
        | T::Widowsplash => &[Pos],

        // owning entity, start, end
        T::ParasiteAttack | T::MedicCableAttack | T::Heatbeam | T::MonsterHeatbeam => {
            &[Short, Pos, Pos]
        }
        T::GrappleCable => &[Short, Pos, Pos, Pos],
        // source entity, destination entity, start, end
        T::Lightning => &[Short, Short, Pos, Pos],
        T::Flashlight => &[Pos, Short],
        T::Forcewall => &[Pos, Pos, Byte],
        T::Widowbeamout => &[Short, Pos],

        // variable length, see parse_temp_entity
        T::Steam => &[Short, Byte, Pos, Dir, Byte, Short],

        T::Railtrail2 | T::Flame => return None,
    };
    Some(fields)
}

/// Reads one `svc_temp_entity` payload.
pub fn parse_temp_entity(msg: &mut MsgReader<'_>) -> Result<TempEntity, ParseError> {
    let raw = msg.read_byte();
    let kind = TempEvent::from_byte(raw).ok_or(ParseError::BadTempEntity(raw))?;
    let fields = layout(kind).ok_or(ParseError::BadTempEntity(raw))?;

    let mut te = TempEntity::new(kind);
    te.read_fields(msg, fields);

    // sustained steam carries its lifetime after the fixed part
    if kind == TempEvent::Steam && te.values.first() != Some(&-1) {
        te.read_fields(msg, &[Long]);
    }

    if msg.overflowed() {
        return Err(ParseError::BadRead("temp entity"));
    }
    Ok(te)
}

#[cfg(test)]
mod tests {
    use super::*;
    use q2net_common::msg::MsgWriter;

    #[test]
    fn test_temp_event_numbers_match_wire() {
        for (i, kind) in TempEvent::ALL.iter().enumerate() {
            assert_eq!(*kind as usize, i);
        }
        assert_eq!(TempEvent::from_byte(56), None);
        assert_eq!(TempEvent::from_byte(-1), None);
    }

    #[test]
    fn test_parse_gunshot() {
        let mut w = MsgWriter::new();
        w.write_byte(TempEvent::Gunshot as i32);
        w.write_pos(&[8.0, -16.0, 32.5]);
        w.write_byte(44);
        w.write_byte(0x7f); // next opcode

        let mut msg = MsgReader::new(w.as_slice());
        let te = parse_temp_entity(&mut msg).unwrap();
        assert_eq!(te.kind, TempEvent::Gunshot);
        assert_eq!(te.positions, vec![[8.0, -16.0, 32.5]]);
        assert_eq!(te.dirs, vec![44]);
        assert!(te.values.is_empty());
        assert_eq!(msg.read_byte(), 0x7f, "cursor must stop at the end of the payload");
    }

    #[test]
    fn test_parse_lightning_keeps_wire_order() {
        let mut w = MsgWriter::new();
        w.write_byte(TempEvent::Lightning as i32);
        w.write_short(12);
        w.write_short(40);
        w.write_pos(&[1.0, 2.0, 3.0]);
        w.write_pos(&[4.0, 5.0, 6.0]);

        let mut msg = MsgReader::new(w.as_slice());
        let te = parse_temp_entity(&mut msg).unwrap();
        assert_eq!(te.values, vec![12, 40]);
        assert_eq!(te.positions, vec![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]);
        assert_eq!(msg.remaining(), 0);
    }

    #[test]
    fn test_parse_steam_interval_only_when_sustained() {
        let one_shot = {
            let mut w = MsgWriter::new();
            w.write_byte(TempEvent::Steam as i32);
            w.write_short(-1);
            w.write_byte(20);
            w.write_pos(&[0.0; 3]);
            w.write_byte(3);
            w.write_byte(0xe0);
            w.write_short(60);
            w.into_inner()
        };
        let mut msg = MsgReader::new(&one_shot);
        let te = parse_temp_entity(&mut msg).unwrap();
        assert_eq!(te.values, vec![-1, 20, 0xe0, 60]);
        assert_eq!(msg.remaining(), 0);

        let sustained = {
            let mut w = MsgWriter::new();
            w.write_byte(TempEvent::Steam as i32);
            w.write_short(7);
            w.write_byte(20);
            w.write_pos(&[0.0; 3]);
            w.write_byte(3);
            w.write_byte(0xe0);
            w.write_short(60);
            w.write_long(2500);
            w.into_inner()
        };
        let mut msg = MsgReader::new(&sustained);
        let te = parse_temp_entity(&mut msg).unwrap();
        assert_eq!(te.values, vec![7, 20, 0xe0, 60, 2500]);
        assert_eq!(msg.remaining(), 0);
    }

    #[test]
    fn test_parse_rejects_unsupported_type() {
        let data = [TempEvent::Flame as u8];
        let mut msg = MsgReader::new(&data);
        assert_eq!(
            parse_temp_entity(&mut msg),
            Err(ParseError::BadTempEntity(TempEvent::Flame as i32))
        );

        let data = [200u8];
        let mut msg = MsgReader::new(&data);
        assert_eq!(parse_temp_entity(&mut msg), Err(ParseError::BadTempEntity(200)));
    }

    #[test]
    fn test_parse_truncated_payload() {
        let data = [TempEvent::Railtrail as u8, 0, 0];
        let mut msg = MsgReader::new(&data);
        assert!(matches!(parse_temp_entity(&mut msg), Err(ParseError::BadRead(_))));
    }
}
