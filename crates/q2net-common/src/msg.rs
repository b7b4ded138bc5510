// msg.rs — message reading and writing over raw byte buffers

use crate::q_shared::{EntityState, UserCmd, Vec3, MAX_EDICTS, RF_BEAM};
use crate::qcommon::{EntityBits, UserCmdBits};

/// Strings longer than this are truncated on read.
pub const MAX_READ_STRING: usize = 2047;

// ============================================================
// MsgReader
// ============================================================

/// Sequential cursor over one received message.
///
/// Reading past the end never fails: integer reads yield -1 and float reads
/// -1.0, and the cursor still advances. Callers compare `overflowed()` after
/// each logical unit and decide whether the message is corrupt.
#[derive(Debug, Clone)]
pub struct MsgReader<'a> {
    data: &'a [u8],
    readcount: usize,
}

impl<'a> MsgReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, readcount: 0 }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn readcount(&self) -> usize {
        self.readcount
    }

    /// True once a read has run past the end of the buffer.
    pub fn overflowed(&self) -> bool {
        self.readcount > self.data.len()
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.readcount)
    }

    fn take<const N: usize>(&mut self) -> Option<[u8; N]> {
        let start = self.readcount;
        self.readcount += N;
        self.data
            .get(start..start + N)
            .and_then(|s| s.try_into().ok())
    }

    pub fn read_char(&mut self) -> i32 {
        self.take::<1>().map_or(-1, |b| b[0] as i8 as i32)
    }

    pub fn read_byte(&mut self) -> i32 {
        self.take::<1>().map_or(-1, |b| b[0] as i32)
    }

    pub fn read_short(&mut self) -> i32 {
        self.take::<2>().map_or(-1, |b| i16::from_le_bytes(b) as i32)
    }

    pub fn read_long(&mut self) -> i32 {
        self.take::<4>().map_or(-1, i32::from_le_bytes)
    }

    pub fn read_float(&mut self) -> f32 {
        self.take::<4>().map_or(-1.0, f32::from_le_bytes)
    }

    /// Reads up to a NUL or the end of the buffer.
    pub fn read_string(&mut self) -> String {
        self.read_string_until(None)
    }

    /// Like `read_string`, but a newline also terminates.
    pub fn read_string_line(&mut self) -> String {
        self.read_string_until(Some(b'\n'))
    }

    fn read_string_until(&mut self, stop: Option<u8>) -> String {
        let mut result = String::new();
        loop {
            let c = self.read_byte();
            if c == -1 || c == 0 || stop == Some(c as u8) {
                break;
            }
            result.push(c as u8 as char);
            if result.len() >= MAX_READ_STRING {
                break;
            }
        }
        result
    }

    pub fn read_coord(&mut self) -> f32 {
        self.read_short() as f32 * (1.0 / 8.0)
    }

    pub fn read_pos(&mut self) -> Vec3 {
        [self.read_coord(), self.read_coord(), self.read_coord()]
    }

    pub fn read_angle(&mut self) -> f32 {
        self.read_char() as f32 * (360.0 / 256.0)
    }

    pub fn read_angle16(&mut self) -> f32 {
        self.read_short() as f32 * (360.0 / 65536.0)
    }

    /// Returns the bytes that were actually present; the cursor advances by
    /// `len` regardless.
    pub fn read_data(&mut self, len: usize) -> &'a [u8] {
        let start = self.readcount.min(self.data.len());
        let end = (self.readcount + len).min(self.data.len());
        self.readcount += len;
        &self.data[start..end]
    }

    pub fn read_delta_usercmd(&mut self, from: &UserCmd) -> UserCmd {
        let mut cmd = *from;
        let bits = UserCmdBits::from_bits_retain(self.read_byte() as u8);

        if bits.contains(UserCmdBits::ANGLE1) {
            cmd.angles[0] = self.read_short() as i16;
        }
        if bits.contains(UserCmdBits::ANGLE2) {
            cmd.angles[1] = self.read_short() as i16;
        }
        if bits.contains(UserCmdBits::ANGLE3) {
            cmd.angles[2] = self.read_short() as i16;
        }
        if bits.contains(UserCmdBits::FORWARD) {
            cmd.forwardmove = self.read_short() as i16;
        }
        if bits.contains(UserCmdBits::SIDE) {
            cmd.sidemove = self.read_short() as i16;
        }
        if bits.contains(UserCmdBits::UP) {
            cmd.upmove = self.read_short() as i16;
        }
        if bits.contains(UserCmdBits::BUTTONS) {
            cmd.buttons = self.read_byte() as u8;
        }
        if bits.contains(UserCmdBits::IMPULSE) {
            cmd.impulse = self.read_byte() as u8;
        }

        cmd.msec = self.read_byte() as u8;
        cmd.lightlevel = self.read_byte() as u8;
        cmd
    }
}

// ============================================================
// MsgWriter
// ============================================================

/// Growable outgoing message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MsgWriter {
    data: Vec<u8>,
}

impl MsgWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }

    pub fn write_char(&mut self, c: i32) {
        self.data.push(c as i8 as u8);
    }

    pub fn write_byte(&mut self, c: i32) {
        self.data.push(c as u8);
    }

    pub fn write_short(&mut self, c: i32) {
        self.data.extend_from_slice(&(c as i16).to_le_bytes());
    }

    pub fn write_long(&mut self, c: i32) {
        self.data.extend_from_slice(&c.to_le_bytes());
    }

    pub fn write_float(&mut self, f: f32) {
        self.data.extend_from_slice(&f.to_le_bytes());
    }

    pub fn write_string(&mut self, s: &str) {
        self.data.extend(s.chars().map(|c| c as u32 as u8));
        self.data.push(0);
    }

    pub fn write_data(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    pub fn write_coord(&mut self, f: f32) {
        self.write_short((f * 8.0) as i32);
    }

    pub fn write_pos(&mut self, pos: &Vec3) {
        for &p in pos {
            self.write_coord(p);
        }
    }

    pub fn write_angle(&mut self, f: f32) {
        self.write_byte(((f * 256.0 / 360.0) as i32) & 255);
    }

    pub fn write_angle16(&mut self, f: f32) {
        self.write_short(((f * 65536.0 / 360.0) as i32) & 65535);
    }

    pub fn write_delta_usercmd(&mut self, from: &UserCmd, cmd: &UserCmd) {
        let mut bits = UserCmdBits::empty();
        bits.set(UserCmdBits::ANGLE1, cmd.angles[0] != from.angles[0]);
        bits.set(UserCmdBits::ANGLE2, cmd.angles[1] != from.angles[1]);
        bits.set(UserCmdBits::ANGLE3, cmd.angles[2] != from.angles[2]);
        bits.set(UserCmdBits::FORWARD, cmd.forwardmove != from.forwardmove);
        bits.set(UserCmdBits::SIDE, cmd.sidemove != from.sidemove);
        bits.set(UserCmdBits::UP, cmd.upmove != from.upmove);
        bits.set(UserCmdBits::BUTTONS, cmd.buttons != from.buttons);
        bits.set(UserCmdBits::IMPULSE, cmd.impulse != from.impulse);

        self.write_byte(bits.bits() as i32);

        for (i, flag) in [UserCmdBits::ANGLE1, UserCmdBits::ANGLE2, UserCmdBits::ANGLE3]
            .into_iter()
            .enumerate()
        {
            if bits.contains(flag) {
                self.write_short(cmd.angles[i] as i32);
            }
        }
        if bits.contains(UserCmdBits::FORWARD) {
            self.write_short(cmd.forwardmove as i32);
        }
        if bits.contains(UserCmdBits::SIDE) {
            self.write_short(cmd.sidemove as i32);
        }
        if bits.contains(UserCmdBits::UP) {
            self.write_short(cmd.upmove as i32);
        }
        if bits.contains(UserCmdBits::BUTTONS) {
            self.write_byte(cmd.buttons as i32);
        }
        if bits.contains(UserCmdBits::IMPULSE) {
            self.write_byte(cmd.impulse as i32);
        }

        self.write_byte(cmd.msec as i32);
        self.write_byte(cmd.lightlevel as i32);
    }

    /// Writes the delta from `from` to `to`, returning the mask that was
    /// sent. Nothing is written when nothing changed and `force` is unset.
    pub fn write_delta_entity(
        &mut self,
        from: &EntityState,
        to: &EntityState,
        force: bool,
        newentity: bool,
    ) -> Option<EntityBits> {
        debug_assert!(to.number != 0, "unset entity number");
        debug_assert!((to.number as usize) < MAX_EDICTS, "entity number >= MAX_EDICTS");

        let bits = entity_delta_bits(from, to, newentity);
        if bits.is_empty() && !force {
            return None;
        }

        let mut bits = bits;
        if to.number >= 256 {
            bits |= EntityBits::NUMBER16;
        }
        let bits = with_morebits(bits);
        let raw = bits.bits();

        self.write_byte((raw & 255) as i32);
        if bits.contains(EntityBits::MOREBITS1) {
            self.write_byte(((raw >> 8) & 255) as i32);
        }
        if bits.contains(EntityBits::MOREBITS2) {
            self.write_byte(((raw >> 16) & 255) as i32);
        }
        if bits.contains(EntityBits::MOREBITS3) {
            self.write_byte(((raw >> 24) & 255) as i32);
        }

        if bits.contains(EntityBits::NUMBER16) {
            self.write_short(to.number);
        } else {
            self.write_byte(to.number);
        }

        if bits.contains(EntityBits::MODEL) {
            self.write_byte(to.modelindex);
        }
        if bits.contains(EntityBits::MODEL2) {
            self.write_byte(to.modelindex2);
        }
        if bits.contains(EntityBits::MODEL3) {
            self.write_byte(to.modelindex3);
        }
        if bits.contains(EntityBits::MODEL4) {
            self.write_byte(to.modelindex4);
        }

        if bits.contains(EntityBits::FRAME8) {
            self.write_byte(to.frame);
        }
        if bits.contains(EntityBits::FRAME16) {
            self.write_short(to.frame);
        }

        self.write_tiered(bits, EntityBits::SKIN8, EntityBits::SKIN16, to.skinnum);
        self.write_tiered(bits, EntityBits::EFFECTS8, EntityBits::EFFECTS16, to.effects as i32);
        self.write_tiered(bits, EntityBits::RENDERFX8, EntityBits::RENDERFX16, to.renderfx);

        if bits.contains(EntityBits::ORIGIN1) {
            self.write_coord(to.origin[0]);
        }
        if bits.contains(EntityBits::ORIGIN2) {
            self.write_coord(to.origin[1]);
        }
        if bits.contains(EntityBits::ORIGIN3) {
            self.write_coord(to.origin[2]);
        }

        if bits.contains(EntityBits::ANGLE1) {
            self.write_angle(to.angles[0]);
        }
        if bits.contains(EntityBits::ANGLE2) {
            self.write_angle(to.angles[1]);
        }
        if bits.contains(EntityBits::ANGLE3) {
            self.write_angle(to.angles[2]);
        }

        if bits.contains(EntityBits::OLDORIGIN) {
            self.write_pos(&to.old_origin);
        }

        if bits.contains(EntityBits::SOUND) {
            self.write_byte(to.sound);
        }
        if bits.contains(EntityBits::EVENT) {
            self.write_byte(to.event);
        }
        if bits.contains(EntityBits::SOLID) {
            self.write_short(to.solid);
        }

        Some(bits)
    }

    fn write_tiered(&mut self, bits: EntityBits, low: EntityBits, high: EntityBits, value: i32) {
        match (bits.contains(low), bits.contains(high)) {
            (true, true) => self.write_long(value),
            (true, false) => self.write_byte(value),
            (false, true) => self.write_short(value),
            (false, false) => {}
        }
    }

    /// Terminates an entity list.
    pub fn write_entity_terminator(&mut self) {
        self.write_short(0);
    }

    /// Writes a removal record for `number`.
    pub fn write_entity_remove(&mut self, number: i32) {
        let mut bits = EntityBits::REMOVE;
        if number >= 256 {
            bits |= EntityBits::NUMBER16 | EntityBits::MOREBITS1;
        }
        self.write_byte((bits.bits() & 255) as i32);
        if bits.contains(EntityBits::MOREBITS1) {
            self.write_byte(((bits.bits() >> 8) & 255) as i32);
            self.write_short(number);
        } else {
            self.write_byte(number);
        }
    }
}

/// Field-change bits for a delta, without the number width or morebits flags.
pub fn entity_delta_bits(from: &EntityState, to: &EntityState, newentity: bool) -> EntityBits {
    let mut bits = EntityBits::empty();

    bits.set(EntityBits::ORIGIN1, to.origin[0] != from.origin[0]);
    bits.set(EntityBits::ORIGIN2, to.origin[1] != from.origin[1]);
    bits.set(EntityBits::ORIGIN3, to.origin[2] != from.origin[2]);

    bits.set(EntityBits::ANGLE1, to.angles[0] != from.angles[0]);
    bits.set(EntityBits::ANGLE2, to.angles[1] != from.angles[1]);
    bits.set(EntityBits::ANGLE3, to.angles[2] != from.angles[2]);

    if to.skinnum != from.skinnum {
        bits |= match to.skinnum as u32 {
            0..=0xff => EntityBits::SKIN8,
            0x100..=0xffff => EntityBits::SKIN16,
            _ => EntityBits::SKIN8 | EntityBits::SKIN16,
        };
    }

    if to.frame != from.frame {
        bits |= if to.frame < 256 {
            EntityBits::FRAME8
        } else {
            EntityBits::FRAME16
        };
    }

    if to.effects != from.effects {
        bits |= match to.effects {
            0..=0xff => EntityBits::EFFECTS8,
            0x100..=0x7fff => EntityBits::EFFECTS16,
            _ => EntityBits::EFFECTS8 | EntityBits::EFFECTS16,
        };
    }

    if to.renderfx != from.renderfx {
        bits |= match to.renderfx as u32 {
            0..=0xff => EntityBits::RENDERFX8,
            0x100..=0x7fff => EntityBits::RENDERFX16,
            _ => EntityBits::RENDERFX8 | EntityBits::RENDERFX16,
        };
    }

    bits.set(EntityBits::SOLID, to.solid != from.solid);
    bits.set(EntityBits::EVENT, to.event != 0);
    bits.set(EntityBits::MODEL, to.modelindex != from.modelindex);
    bits.set(EntityBits::MODEL2, to.modelindex2 != from.modelindex2);
    bits.set(EntityBits::MODEL3, to.modelindex3 != from.modelindex3);
    bits.set(EntityBits::MODEL4, to.modelindex4 != from.modelindex4);
    bits.set(EntityBits::SOUND, to.sound != from.sound);

    if newentity || (to.renderfx & RF_BEAM) != 0 {
        bits |= EntityBits::OLDORIGIN;
    }

    bits
}

/// Adds the continuation flags implied by the highest non-zero byte.
pub fn with_morebits(bits: EntityBits) -> EntityBits {
    let raw = bits.bits();
    let more = if raw & 0xff00_0000 != 0 {
        EntityBits::MOREBITS3 | EntityBits::MOREBITS2 | EntityBits::MOREBITS1
    } else if raw & 0x00ff_0000 != 0 {
        EntityBits::MOREBITS2 | EntityBits::MOREBITS1
    } else if raw & 0x0000_ff00 != 0 {
        EntityBits::MOREBITS1
    } else {
        EntityBits::empty()
    };
    bits | more
}
