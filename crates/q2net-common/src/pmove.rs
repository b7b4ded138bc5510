// pmove.rs — deterministic player movement, shared by prediction and the server

use crate::q_shared::{
    angle_vectors, cross_product, dot_product, short2angle, vector_length, vector_ma,
    vector_normalize, vector_scale, CSurface, PmFlags, PmType, PmoveState, Trace,
    UserCmd, Vec3, CONTENTS_CURRENT_0, CONTENTS_CURRENT_180, CONTENTS_CURRENT_270,
    CONTENTS_CURRENT_90, CONTENTS_CURRENT_DOWN, CONTENTS_CURRENT_UP, CONTENTS_LADDER,
    CONTENTS_SLIME, CONTENTS_SOLID, CONTENTS_WATER, MASK_CURRENT, MASK_WATER, MAXTOUCH,
    MAX_CLIP_PLANES, PITCH, SURF_SLICK, VEC3_ORIGIN, YAW,
};

// ============================================================
// Constants
// ============================================================

pub const STEPSIZE: f32 = 18.0;
const STOP_EPSILON: f32 = 0.1;
const MIN_STEP_NORMAL: f32 = 0.7;
const OVERCLIP: f32 = 1.01;

pub const PM_STOPSPEED: f32 = 100.0;
pub const PM_MAXSPEED: f32 = 300.0;
pub const PM_DUCKSPEED: f32 = 100.0;
pub const PM_ACCELERATE: f32 = 10.0;
pub const PM_WATERACCELERATE: f32 = 10.0;
pub const PM_FRICTION: f32 = 6.0;
pub const PM_WATERFRICTION: f32 = 1.0;
pub const PM_WATERSPEED: f32 = 400.0;

const JUMP_VELOCITY: f32 = 270.0;

/// Priority order of the one-unit nudges tried when snapping to the grid.
const JITTERBITS: [u8; 8] = [0, 4, 1, 2, 3, 5, 6, 7];

// ============================================================
// Collision oracle
// ============================================================

/// World queries the movement step depends on.
///
/// Implementations must be pure with respect to a given world: the same
/// query always returns the same answer, otherwise prediction diverges
/// from the server.
pub trait CollisionOracle {
    /// Sweeps the box `mins..maxs` from `start` to `end`.
    fn trace(&self, start: &Vec3, mins: &Vec3, maxs: &Vec3, end: &Vec3) -> Trace;

    /// Contents mask at a single point.
    fn point_contents(&self, point: &Vec3) -> i32;
}

impl<T: CollisionOracle + ?Sized> CollisionOracle for &T {
    fn trace(&self, start: &Vec3, mins: &Vec3, maxs: &Vec3, end: &Vec3) -> Trace {
        (**self).trace(start, mins, maxs, end)
    }

    fn point_contents(&self, point: &Vec3) -> i32 {
        (**self).point_contents(point)
    }
}

// ============================================================
// Movement input and output
// ============================================================

#[derive(Debug, Clone, PartialEq)]
pub struct PmoveData {
    /// in/out: quantized physical state
    pub s: PmoveState,
    /// in: the command being applied
    pub cmd: UserCmd,
    /// in: search for a valid position around the starting point first
    pub snapinitial: bool,
    /// in: air acceleration announced by the server
    pub airaccelerate: f32,

    // results
    pub touchents: Vec<i32>,
    pub viewangles: Vec3,
    pub viewheight: f32,
    pub mins: Vec3,
    pub maxs: Vec3,
    pub groundentity: Option<i32>,
    pub watertype: i32,
    pub waterlevel: i32,
}

impl Default for PmoveData {
    fn default() -> Self {
        Self {
            s: PmoveState::default(),
            cmd: UserCmd::default(),
            snapinitial: false,
            airaccelerate: 0.0,
            touchents: Vec::new(),
            viewangles: VEC3_ORIGIN,
            viewheight: 0.0,
            mins: VEC3_ORIGIN,
            maxs: VEC3_ORIGIN,
            groundentity: None,
            watertype: 0,
            waterlevel: 0,
        }
    }
}

impl PmoveData {
    pub fn new(s: PmoveState, cmd: UserCmd) -> Self {
        Self {
            s,
            cmd,
            ..Self::default()
        }
    }
}

/// Removes the part of `v` going into `normal`, scaled by `overbounce`, and
/// zeroes components that end up negligibly small.
pub fn clip_velocity(v: &Vec3, normal: &Vec3, overbounce: f32) -> Vec3 {
    let backoff = dot_product(v, normal) * overbounce;
    let mut out = [0.0; 3];
    for i in 0..3 {
        out[i] = v[i] - normal[i] * backoff;
        if out[i] > -STOP_EPSILON && out[i] < STOP_EPSILON {
            out[i] = 0.0;
        }
    }
    out
}

fn current_direction(contents: i32) -> Vec3 {
    let mut v = VEC3_ORIGIN;
    if contents & CONTENTS_CURRENT_0 != 0 {
        v[0] += 1.0;
    }
    if contents & CONTENTS_CURRENT_90 != 0 {
        v[1] += 1.0;
    }
    if contents & CONTENTS_CURRENT_180 != 0 {
        v[0] -= 1.0;
    }
    if contents & CONTENTS_CURRENT_270 != 0 {
        v[1] -= 1.0;
    }
    if contents & CONTENTS_CURRENT_UP != 0 {
        v[2] += 1.0;
    }
    if contents & CONTENTS_CURRENT_DOWN != 0 {
        v[2] -= 1.0;
    }
    v
}

// ============================================================
// Per-step working state
// ============================================================

struct Mover<'a, O: CollisionOracle> {
    pm: &'a mut PmoveData,
    oracle: &'a O,

    origin: Vec3,
    velocity: Vec3,

    forward: Vec3,
    right: Vec3,
    frametime: f32,

    ground_surface: Option<CSurface>,
    ground_contents: i32,

    previous_origin: [i16; 3],
    ladder: bool,
}

impl<'a, O: CollisionOracle> Mover<'a, O> {
    fn new(pm: &'a mut PmoveData, oracle: &'a O) -> Self {
        let origin = pm.s.origin.map(|c| c as f32 * 0.125);
        let velocity = pm.s.velocity.map(|c| c as f32 * 0.125);
        let previous_origin = pm.s.origin;
        let frametime = pm.cmd.msec as f32 * 0.001;
        Self {
            pm,
            oracle,
            origin,
            velocity,
            forward: VEC3_ORIGIN,
            right: VEC3_ORIGIN,
            frametime,
            ground_surface: None,
            ground_contents: 0,
            previous_origin,
            ladder: false,
        }
    }

    fn trace(&self, start: &Vec3, end: &Vec3) -> Trace {
        self.oracle.trace(start, &self.pm.mins, &self.pm.maxs, end)
    }

    fn touch(&mut self, ent: Option<i32>) {
        if let Some(ent) = ent {
            if self.pm.touchents.len() < MAXTOUCH {
                self.pm.touchents.push(ent);
            }
        }
    }

    fn on_ground(&self) -> bool {
        self.pm.groundentity.is_some()
    }

    fn clear_timers(&mut self) {
        self.pm.s.pm_flags.remove(PmFlags::TIMERS);
        self.pm.s.pm_time = 0;
    }

    // --------------------------------------------------------
    // Sliding
    // --------------------------------------------------------

    fn slide_move(&mut self) {
        let primal_velocity = self.velocity;
        let mut planes = [VEC3_ORIGIN; MAX_CLIP_PLANES];
        let mut numplanes = 0;
        let mut time_left = self.frametime;

        for _ in 0..4 {
            let end = vector_ma(&self.origin, time_left, &self.velocity);
            let trace = self.trace(&self.origin, &end);

            if trace.allsolid {
                // trapped in another solid
                self.velocity[2] = 0.0;
                return;
            }

            if trace.fraction > 0.0 {
                self.origin = trace.endpos;
                numplanes = 0;
            }

            if trace.fraction == 1.0 {
                break;
            }

            self.touch(trace.ent);

            time_left -= time_left * trace.fraction;

            if numplanes >= MAX_CLIP_PLANES {
                self.velocity = VEC3_ORIGIN;
                break;
            }
            planes[numplanes] = trace.plane.normal;
            numplanes += 1;

            // each clip builds on the last until one parallels every plane
            let mut fits = false;
            for i in 0..numplanes {
                self.velocity = clip_velocity(&self.velocity, &planes[i], OVERCLIP);
                fits = (0..numplanes)
                    .filter(|&j| j != i)
                    .all(|j| dot_product(&self.velocity, &planes[j]) >= 0.0);
                if fits {
                    break;
                }
            }

            if !fits {
                if numplanes != 2 {
                    self.velocity = VEC3_ORIGIN;
                    break;
                }
                // go along the crease
                let dir = cross_product(&planes[0], &planes[1]);
                let d = dot_product(&dir, &self.velocity);
                self.velocity = vector_scale(&dir, d);
            }

            // never turn back against the original direction
            if dot_product(&self.velocity, &primal_velocity) <= 0.0 {
                self.velocity = VEC3_ORIGIN;
                break;
            }
        }

        if self.pm.s.pm_time != 0 {
            self.velocity = primal_velocity;
        }
    }

    /// Slides, then retries the same move raised by a stair step and keeps
    /// whichever went farther horizontally.
    fn step_slide_move(&mut self) {
        let start_o = self.origin;
        let start_v = self.velocity;

        self.slide_move();

        let down_o = self.origin;
        let down_v = self.velocity;

        let mut up = start_o;
        up[2] += STEPSIZE;

        if self.trace(&up, &up).allsolid {
            return;
        }

        self.origin = up;
        self.velocity = start_v;

        self.slide_move();

        let mut down = self.origin;
        down[2] -= STEPSIZE;
        let trace = self.trace(&self.origin, &down);
        if !trace.allsolid {
            self.origin = trace.endpos;
        }

        let horizontal = |p: &Vec3| {
            (p[0] - start_o[0]) * (p[0] - start_o[0]) + (p[1] - start_o[1]) * (p[1] - start_o[1])
        };
        let down_dist = horizontal(&down_o);
        let up_dist = horizontal(&self.origin);

        if down_dist > up_dist || trace.plane.normal[2] < MIN_STEP_NORMAL {
            self.origin = down_o;
            self.velocity = down_v;
            return;
        }

        // walking along a plane keeps the lower move's vertical speed
        self.velocity[2] = down_v[2];
    }

    // --------------------------------------------------------
    // Acceleration
    // --------------------------------------------------------

    fn friction(&mut self) {
        let speed = vector_length(&self.velocity);
        if speed < 1.0 {
            self.velocity[0] = 0.0;
            self.velocity[1] = 0.0;
            return;
        }

        let mut drop = 0.0;

        let slick = self
            .ground_surface
            .as_ref()
            .is_some_and(|s| s.flags & SURF_SLICK != 0);
        if (self.on_ground() && self.ground_surface.is_some() && !slick) || self.ladder {
            let control = speed.max(PM_STOPSPEED);
            drop += control * PM_FRICTION * self.frametime;
        }

        if self.pm.waterlevel != 0 && !self.ladder {
            drop += speed * PM_WATERFRICTION * self.pm.waterlevel as f32 * self.frametime;
        }

        let newspeed = (speed - drop).max(0.0) / speed;
        self.velocity = vector_scale(&self.velocity, newspeed);
    }

    fn accelerate(&mut self, wishdir: &Vec3, wishspeed: f32, accel: f32) {
        let addspeed = wishspeed - dot_product(&self.velocity, wishdir);
        if addspeed <= 0.0 {
            return;
        }
        let accelspeed = (accel * self.frametime * wishspeed).min(addspeed);
        self.velocity = vector_ma(&self.velocity, accelspeed, wishdir);
    }

    fn air_accelerate(&mut self, wishdir: &Vec3, wishspeed: f32, accel: f32) {
        let addspeed = wishspeed.min(30.0) - dot_product(&self.velocity, wishdir);
        if addspeed <= 0.0 {
            return;
        }
        let accelspeed = (accel * wishspeed * self.frametime).min(addspeed);
        self.velocity = vector_ma(&self.velocity, accelspeed, wishdir);
    }

    fn add_currents(&self, wishvel: &mut Vec3) {
        if self.ladder && self.velocity[2].abs() <= 200.0 {
            let cmd = &self.pm.cmd;
            let pitch = self.pm.viewangles[PITCH];
            wishvel[2] = if pitch <= -15.0 && cmd.forwardmove > 0 {
                200.0
            } else if pitch >= 15.0 && cmd.forwardmove > 0 {
                -200.0
            } else if cmd.upmove > 0 {
                200.0
            } else if cmd.upmove < 0 {
                -200.0
            } else {
                0.0
            };

            // limit horizontal speed on a ladder
            wishvel[0] = wishvel[0].clamp(-25.0, 25.0);
            wishvel[1] = wishvel[1].clamp(-25.0, 25.0);
        }

        if self.pm.watertype & MASK_CURRENT != 0 {
            let v = current_direction(self.pm.watertype);
            let mut s = PM_WATERSPEED;
            if self.pm.waterlevel == 1 && self.on_ground() {
                s /= 2.0;
            }
            *wishvel = vector_ma(wishvel, s, &v);
        }

        // conveyor belts
        if self.on_ground() {
            let v = current_direction(self.ground_contents);
            *wishvel = vector_ma(wishvel, 100.0, &v);
        }
    }

    // --------------------------------------------------------
    // Movement modes
    // --------------------------------------------------------

    fn water_move(&mut self) {
        let cmd = self.pm.cmd;
        let fm = cmd.forwardmove as f32;
        let sm = cmd.sidemove as f32;

        let mut wishvel = [0.0; 3];
        for i in 0..3 {
            wishvel[i] = self.forward[i] * fm + self.right[i] * sm;
        }

        if cmd.forwardmove == 0 && cmd.sidemove == 0 && cmd.upmove == 0 {
            wishvel[2] -= 60.0; // sink
        } else {
            wishvel[2] += cmd.upmove as f32;
        }

        self.add_currents(&mut wishvel);

        let mut wishdir = wishvel;
        let wishspeed = vector_normalize(&mut wishdir).min(PM_MAXSPEED) * 0.5;

        self.accelerate(&wishdir, wishspeed, PM_WATERACCELERATE);
        self.step_slide_move();
    }

    fn air_move(&mut self) {
        let fm = self.pm.cmd.forwardmove as f32;
        let sm = self.pm.cmd.sidemove as f32;

        let mut wishvel = [
            self.forward[0] * fm + self.right[0] * sm,
            self.forward[1] * fm + self.right[1] * sm,
            0.0,
        ];

        self.add_currents(&mut wishvel);

        let mut wishdir = wishvel;
        let mut wishspeed = vector_normalize(&mut wishdir);

        let maxspeed = if self.pm.s.pm_flags.contains(PmFlags::DUCKED) {
            PM_DUCKSPEED
        } else {
            PM_MAXSPEED
        };
        if wishspeed > maxspeed {
            wishvel = vector_scale(&wishvel, maxspeed / wishspeed);
            wishspeed = maxspeed;
        }

        let gravity = self.pm.s.gravity as f32;

        if self.ladder {
            self.accelerate(&wishdir, wishspeed, PM_ACCELERATE);
            if wishvel[2] == 0.0 {
                // bleed vertical speed towards zero
                if self.velocity[2] > 0.0 {
                    self.velocity[2] = (self.velocity[2] - gravity * self.frametime).max(0.0);
                } else {
                    self.velocity[2] = (self.velocity[2] + gravity * self.frametime).min(0.0);
                }
            }
            self.step_slide_move();
        } else if self.on_ground() {
            self.velocity[2] = 0.0;
            self.accelerate(&wishdir, wishspeed, PM_ACCELERATE);

            // inverted gravity still pulls while grounded
            if gravity > 0.0 {
                self.velocity[2] = 0.0;
            } else {
                self.velocity[2] -= gravity * self.frametime;
            }

            if self.velocity[0] == 0.0 && self.velocity[1] == 0.0 {
                return;
            }
            self.step_slide_move();
        } else {
            if self.pm.airaccelerate != 0.0 {
                self.air_accelerate(&wishdir, wishspeed, PM_ACCELERATE);
            } else {
                self.accelerate(&wishdir, wishspeed, 1.0);
            }
            self.velocity[2] -= gravity * self.frametime;
            self.step_slide_move();
        }
    }

    /// Spectator movement: extra friction, full 3D wish velocity, no gravity.
    fn fly_move(&mut self) {
        self.pm.viewheight = 22.0;

        let speed = vector_length(&self.velocity);
        if speed < 1.0 {
            self.velocity = VEC3_ORIGIN;
        } else {
            let control = speed.max(PM_STOPSPEED);
            let drop = control * PM_FRICTION * 1.5 * self.frametime;
            let newspeed = (speed - drop).max(0.0) / speed;
            self.velocity = vector_scale(&self.velocity, newspeed);
        }

        vector_normalize(&mut self.forward);
        vector_normalize(&mut self.right);

        let fm = self.pm.cmd.forwardmove as f32;
        let sm = self.pm.cmd.sidemove as f32;
        let mut wishvel = [0.0; 3];
        for i in 0..3 {
            wishvel[i] = self.forward[i] * fm + self.right[i] * sm;
        }
        wishvel[2] += self.pm.cmd.upmove as f32;

        let mut wishdir = wishvel;
        let wishspeed = vector_normalize(&mut wishdir).min(PM_MAXSPEED);

        self.accelerate(&wishdir, wishspeed, PM_ACCELERATE);

        self.origin = vector_ma(&self.origin, self.frametime, &self.velocity);
    }

    fn dead_move(&mut self) {
        if !self.on_ground() {
            return;
        }

        let forward = vector_length(&self.velocity) - 20.0;
        if forward <= 0.0 {
            self.velocity = VEC3_ORIGIN;
        } else {
            vector_normalize(&mut self.velocity);
            self.velocity = vector_scale(&self.velocity, forward);
        }
    }

    // --------------------------------------------------------
    // Environment checks
    // --------------------------------------------------------

    fn categorize_position(&mut self) {
        let mut point = self.origin;
        point[2] -= 0.25;

        if self.velocity[2] > 180.0 {
            self.pm.s.pm_flags.remove(PmFlags::ON_GROUND);
            self.pm.groundentity = None;
        } else {
            let trace = self.trace(&self.origin, &point);
            self.ground_surface = trace.surface.clone();
            self.ground_contents = trace.contents;

            let ground = trace
                .ent
                .filter(|_| trace.plane.normal[2] >= 0.7 || trace.startsolid);

            match ground {
                None => {
                    self.pm.groundentity = None;
                    self.pm.s.pm_flags.remove(PmFlags::ON_GROUND);
                }
                Some(ent) => {
                    self.pm.groundentity = Some(ent);

                    // landing ends a waterjump
                    if self.pm.s.pm_flags.contains(PmFlags::TIME_WATERJUMP) {
                        self.clear_timers();
                    }

                    if !self.pm.s.pm_flags.contains(PmFlags::ON_GROUND) {
                        self.pm.s.pm_flags.insert(PmFlags::ON_GROUND);
                        // no landing pause when just walking down a slope
                        if self.velocity[2] < -200.0 {
                            self.pm.s.pm_flags.insert(PmFlags::TIME_LAND);
                            self.pm.s.pm_time = if self.velocity[2] < -400.0 { 25 } else { 18 };
                        }
                    }
                }
            }

            self.touch(trace.ent);
        }

        // water level, sampled at feet, waist and eyes
        self.pm.waterlevel = 0;
        self.pm.watertype = 0;

        let sample2 = (self.pm.viewheight - self.pm.mins[2]) as i32;
        let sample1 = sample2 / 2;

        let mut point = self.origin;
        point[2] += self.pm.mins[2] + 1.0;
        let cont = self.oracle.point_contents(&point);
        if cont & MASK_WATER == 0 {
            return;
        }

        self.pm.watertype = cont;
        self.pm.waterlevel = 1;
        point[2] = self.origin[2] + self.pm.mins[2] + sample1 as f32;
        if self.oracle.point_contents(&point) & MASK_WATER == 0 {
            return;
        }

        self.pm.waterlevel = 2;
        point[2] = self.origin[2] + self.pm.mins[2] + sample2 as f32;
        if self.oracle.point_contents(&point) & MASK_WATER != 0 {
            self.pm.waterlevel = 3;
        }
    }

    fn check_jump(&mut self) {
        if self.pm.s.pm_flags.contains(PmFlags::TIME_LAND) {
            return;
        }

        if self.pm.cmd.upmove < 10 {
            self.pm.s.pm_flags.remove(PmFlags::JUMP_HELD);
            return;
        }

        // must release jump before jumping again
        if self.pm.s.pm_flags.contains(PmFlags::JUMP_HELD) {
            return;
        }

        if self.pm.s.pm_type == PmType::Dead {
            return;
        }

        if self.pm.waterlevel >= 2 {
            // swimming, not jumping
            self.pm.groundentity = None;

            if self.velocity[2] <= -300.0 {
                return;
            }

            self.velocity[2] = match self.pm.watertype {
                CONTENTS_WATER => 100.0,
                CONTENTS_SLIME => 80.0,
                _ => 50.0,
            };
            return;
        }

        if !self.on_ground() {
            return;
        }

        self.pm.s.pm_flags.insert(PmFlags::JUMP_HELD);
        self.pm.groundentity = None;
        self.velocity[2] = (self.velocity[2] + JUMP_VELOCITY).max(JUMP_VELOCITY);
    }

    fn check_special_movement(&mut self) {
        if self.pm.s.pm_time != 0 {
            return;
        }

        self.ladder = false;

        let mut flatforward = [self.forward[0], self.forward[1], 0.0];
        vector_normalize(&mut flatforward);

        let spot = vector_ma(&self.origin, 1.0, &flatforward);
        let trace = self.trace(&self.origin, &spot);
        if trace.fraction < 1.0 && trace.contents & CONTENTS_LADDER != 0 {
            self.ladder = true;
        }

        if self.pm.waterlevel != 2 {
            return;
        }

        // a wall in front at waist height with open air above it
        let mut spot = vector_ma(&self.origin, 30.0, &flatforward);
        spot[2] += 4.0;
        if self.oracle.point_contents(&spot) & CONTENTS_SOLID == 0 {
            return;
        }

        spot[2] += 16.0;
        if self.oracle.point_contents(&spot) != 0 {
            return;
        }

        self.velocity = vector_scale(&flatforward, 50.0);
        self.velocity[2] = 350.0;

        self.pm.s.pm_flags.insert(PmFlags::TIME_WATERJUMP);
        self.pm.s.pm_time = 255;
    }

    fn check_duck(&mut self) {
        self.pm.mins = [-16.0, -16.0, -24.0];
        self.pm.maxs = [16.0, 16.0, 32.0];

        if self.pm.s.pm_type == PmType::Gib {
            self.pm.mins[2] = 0.0;
            self.pm.maxs[2] = 16.0;
            self.pm.viewheight = 8.0;
            return;
        }

        let flags = self.pm.s.pm_flags;
        if self.pm.s.pm_type == PmType::Dead
            || (self.pm.cmd.upmove < 0 && flags.contains(PmFlags::ON_GROUND))
        {
            self.pm.s.pm_flags.insert(PmFlags::DUCKED);
        } else if flags.contains(PmFlags::DUCKED) {
            // stand up if the full height box fits
            let trace = self.trace(&self.origin, &self.origin);
            if !trace.allsolid {
                self.pm.s.pm_flags.remove(PmFlags::DUCKED);
            }
        }

        if self.pm.s.pm_flags.contains(PmFlags::DUCKED) {
            self.pm.maxs[2] = 4.0;
            self.pm.viewheight = -2.0;
        } else {
            self.pm.maxs[2] = 32.0;
            self.pm.viewheight = 22.0;
        }
    }

    fn clamp_angles(&mut self) {
        let cmd = self.pm.cmd;
        let delta = self.pm.s.delta_angles;

        if self.pm.s.pm_flags.contains(PmFlags::TIME_TELEPORT) {
            self.pm.viewangles = [
                0.0,
                short2angle(cmd.angles[YAW].wrapping_add(delta[YAW])),
                0.0,
            ];
        } else {
            let mut angles = [0.0; 3];
            for i in 0..3 {
                angles[i] = short2angle(cmd.angles[i].wrapping_add(delta[i]));
            }

            // no looking past straight up or down
            if angles[PITCH] > 89.0 && angles[PITCH] < 180.0 {
                angles[PITCH] = 89.0;
            } else if angles[PITCH] < 271.0 && angles[PITCH] >= 180.0 {
                angles[PITCH] = 271.0;
            }
            self.pm.viewangles = angles;
        }

        let (forward, right, _) = angle_vectors(&self.pm.viewangles);
        self.forward = forward;
        self.right = right;
    }

    // --------------------------------------------------------
    // Grid snapping
    // --------------------------------------------------------

    fn good_position(&self, origin: [i16; 3]) -> bool {
        if self.pm.s.pm_type == PmType::Spectator {
            return true;
        }
        let origin = origin.map(|c| c as f32 * 0.125);
        !self.trace(&origin, &origin).allsolid
    }

    /// Quantizes the float origin to the 1/8 grid, nudging towards the
    /// float position until a valid spot is found.
    fn snap_position(&mut self) {
        self.pm.s.velocity = self.velocity.map(|v| (v * 8.0) as i16);

        let mut sign = [0i16; 3];
        let mut base = [0i16; 3];
        for i in 0..3 {
            base[i] = (self.origin[i] * 8.0) as i16;
            sign[i] = if base[i] as f32 * 0.125 == self.origin[i] {
                0
            } else if self.origin[i] >= 0.0 {
                1
            } else {
                -1
            };
        }

        for bits in JITTERBITS {
            let mut candidate = base;
            for i in 0..3 {
                if bits & (1 << i) != 0 {
                    candidate[i] = candidate[i].wrapping_add(sign[i]);
                }
            }
            if self.good_position(candidate) {
                self.pm.s.origin = candidate;
                return;
            }
        }

        // nothing fits, stay where the step started
        self.pm.s.origin = self.previous_origin;
    }

    fn initial_snap_position(&mut self) {
        const OFFSET: [i16; 3] = [0, -1, 1];

        let base = self.pm.s.origin;
        for z in OFFSET {
            for y in OFFSET {
                for x in OFFSET {
                    let candidate = [
                        base[0].wrapping_add(x),
                        base[1].wrapping_add(y),
                        base[2].wrapping_add(z),
                    ];
                    if self.good_position(candidate) {
                        self.pm.s.origin = candidate;
                        self.origin = candidate.map(|c| c as f32 * 0.125);
                        self.previous_origin = candidate;
                        return;
                    }
                }
            }
        }

        log::debug!("bad initial snap position {:?}", base);
    }

    // --------------------------------------------------------
    // Step
    // --------------------------------------------------------

    fn run(&mut self) {
        self.clamp_angles();

        if self.pm.s.pm_type == PmType::Spectator {
            self.fly_move();
            self.snap_position();
            return;
        }

        if matches!(
            self.pm.s.pm_type,
            PmType::Dead | PmType::Gib | PmType::Freeze
        ) {
            self.pm.cmd.forwardmove = 0;
            self.pm.cmd.sidemove = 0;
            self.pm.cmd.upmove = 0;
        }

        if self.pm.s.pm_type == PmType::Freeze {
            return;
        }

        self.check_duck();

        if self.pm.snapinitial {
            self.initial_snap_position();
        }

        self.categorize_position();

        if self.pm.s.pm_type == PmType::Dead {
            self.dead_move();
        }

        self.check_special_movement();

        // timers count in 8 ms units
        if self.pm.s.pm_time != 0 {
            let msec = (self.pm.cmd.msec >> 3).max(1);
            if msec >= self.pm.s.pm_time {
                self.clear_timers();
            } else {
                self.pm.s.pm_time -= msec;
            }
        }

        if self.pm.s.pm_flags.contains(PmFlags::TIME_TELEPORT) {
            // teleport pause stays exactly in place
        } else if self.pm.s.pm_flags.contains(PmFlags::TIME_WATERJUMP) {
            // no control, but falls
            self.velocity[2] -= self.pm.s.gravity as f32 * self.frametime;
            if self.velocity[2] < 0.0 {
                self.clear_timers();
            }
            self.step_slide_move();
        } else {
            self.check_jump();
            self.friction();

            if self.pm.waterlevel >= 2 {
                self.water_move();
            } else {
                // flatten pitch so looking down does not slow walking
                let mut angles = self.pm.viewangles;
                if angles[PITCH] > 180.0 {
                    angles[PITCH] -= 360.0;
                }
                angles[PITCH] /= 3.0;
                let (forward, right, _) = angle_vectors(&angles);
                self.forward = forward;
                self.right = right;

                self.air_move();
            }
        }

        self.categorize_position();
        self.snap_position();
    }
}

/// Advances `pm.s` by one command. Identical inputs and oracle answers
/// always produce identical outputs.
pub fn pmove<O: CollisionOracle>(pm: &mut PmoveData, oracle: &O) {
    pm.touchents.clear();
    pm.viewangles = VEC3_ORIGIN;
    pm.viewheight = 0.0;
    pm.groundentity = None;
    pm.watertype = 0;
    pm.waterlevel = 0;

    Mover::new(pm, oracle).run();
}
