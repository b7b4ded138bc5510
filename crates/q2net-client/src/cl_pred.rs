// cl_pred.rs -- client side movement prediction

use q2net_common::cvar::CvarContext;
use q2net_common::pmove::{pmove, CollisionOracle, PmoveData};
use q2net_common::q_shared::{short2angle, PmFlags, CS_AIRACCEL};

use crate::client::{ClientState, ClientStatic, ConnState};

/// Misses larger than this (summed over the axes, in 1/8 units) are treated
/// as teleports rather than smoothed.
pub const MAX_PREDICTION_MISS: i32 = 640;

/// Compares the server's position for the last acknowledged command with
/// what we predicted for it.
pub fn check_prediction_error(cl: &mut ClientState, cls: &ClientStatic, cvars: &CvarContext) {
    if cvars.value("cl_predict") == 0.0
        || cl
            .frame
            .playerstate
            .pmove
            .pm_flags
            .contains(PmFlags::NO_PREDICTION)
    {
        return;
    }

    // calculate the last command we sent that the server has processed
    let ack = cl.cmds.netchan().incoming_acknowledged;

    // compare what the server returned with what we had predicted it to be
    let server = cl.frame.playerstate.pmove.origin;
    let predicted = cl.predicted_origins.get(ack);
    let delta = [
        server[0] as i32 - predicted[0] as i32,
        server[1] as i32 - predicted[1] as i32,
        server[2] as i32 - predicted[2] as i32,
    ];

    // save the prediction error for interpolation
    let len = delta[0].abs() + delta[1].abs() + delta[2].abs();
    if len > MAX_PREDICTION_MISS {
        // a teleport or something
        cl.prediction_error.clear();
        return;
    }

    if cvars.value("cl_showmiss") != 0.0 && (delta[0] != 0 || delta[1] != 0 || delta[2] != 0) {
        log::debug!(
            "prediction miss on {}: {}",
            cl.frame.serverframe,
            delta[0] + delta[1] + delta[2]
        );
    }

    cl.predicted_origins.record(ack, server);

    // save for error interpolation
    cl.prediction_error.set(
        [
            delta[0] as f32 * 0.125,
            delta[1] as f32 * 0.125,
            delta[2] as f32 * 0.125,
        ],
        cls.realtime,
    );
}

/// Sets cl.predicted_origin and cl.predicted_angles by replaying every
/// command the server has not acknowledged yet on top of the last frame.
pub fn predict_movement<O: CollisionOracle>(
    cl: &mut ClientState,
    cls: &ClientStatic,
    cvars: &CvarContext,
    oracle: &O,
) {
    if cls.state != ConnState::Active {
        return;
    }

    if cvars.value("paused") != 0.0 {
        return;
    }

    let pmove_state = cl.frame.playerstate.pmove;
    if cvars.value("cl_predict") == 0.0 || pmove_state.pm_flags.contains(PmFlags::NO_PREDICTION) {
        // just set angles
        for i in 0..3 {
            cl.predicted_angles[i] = cl.viewangles[i] + short2angle(pmove_state.delta_angles[i]);
        }
        return;
    }

    // if we are too far out of date, just freeze
    if cl.cmds.is_stale() {
        if cvars.value("cl_showmiss") != 0.0 {
            log::debug!("exceeded CMD_BACKUP");
        }
        return;
    }

    // copy current state to pmove
    let mut pm = PmoveData::new(pmove_state, Default::default());
    pm.airaccelerate = cl.configstrings[CS_AIRACCEL].trim().parse::<f32>().unwrap_or(0.0);

    // run frames
    for seq in cl.cmds.unacknowledged() {
        let cmd = *cl.cmds.get(seq);
        if cmd.msec != 0 {
            pm.cmd = cmd;
            pmove(&mut pm, oracle);
        }

        // save for debug checking
        cl.predicted_origins.record(seq, pm.s.origin);
    }

    // stair step smoothing: compare against the last presented origin and
    // only treat typical step heights as steps
    let oldz = cl.predicted_origin[2];
    let newz = pm.s.origin[2] as f32 * 0.125;
    let step = newz - oldz;
    let moving = pm.s.velocity[0] != 0 || pm.s.velocity[1] != 0;
    if pm.s.pm_flags.contains(PmFlags::ON_GROUND) && moving && step > 7.0 && step < 17.0 {
        cl.predicted_step = step;
        cl.predicted_step_time = cls.realtime - (cls.frametime * 500.0) as i32;
    }

    // copy results out for rendering
    cl.predicted_origin = [
        pm.s.origin[0] as f32 * 0.125,
        pm.s.origin[1] as f32 * 0.125,
        pm.s.origin[2] as f32 * 0.125,
    ];
    cl.predicted_angles = pm.viewangles;
}
