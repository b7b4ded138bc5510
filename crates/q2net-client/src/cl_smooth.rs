// cl_smooth.rs -- presentation smoothing for predicted movement
//
// Nothing here feeds back into prediction. The offsets are only applied to
// the origin handed to the renderer.

use q2net_common::q_shared::Vec3;

/// Stair steps are eased in over this many milliseconds.
pub const STEP_SMOOTH_MS: i32 = 100;

// ============================================================
// Prediction error
// ============================================================

/// Last measured prediction miss, in world units, blended out over time.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PredictionError {
    /// Miss when it was measured
    pub error: Vec3,
    /// Time the miss was measured
    pub error_time: i32,
}

impl PredictionError {
    /// Starts blending out a fresh miss.
    pub fn set(&mut self, error: Vec3, current_time: i32) {
        self.error = error;
        self.error_time = current_time;
    }

    /// Drops the error at once, for teleports and huge misses.
    pub fn clear(&mut self) {
        self.error = [0.0; 3];
    }

    pub fn is_zero(&self) -> bool {
        self.error == [0.0; 3]
    }

    /// Offset to subtract from the predicted origin at `current_time`.
    /// Decays linearly from the full miss to zero over `smooth_ms`.
    pub fn view_offset(&self, current_time: i32, smooth_ms: i32) -> Vec3 {
        if smooth_ms <= 0 {
            return [0.0; 3];
        }
        let elapsed = (current_time - self.error_time).max(0);
        if elapsed >= smooth_ms {
            return [0.0; 3];
        }

        let remaining = 1.0 - elapsed as f32 / smooth_ms as f32;
        [
            self.error[0] * remaining,
            self.error[1] * remaining,
            self.error[2] * remaining,
        ]
    }
}

// ============================================================
// Stair steps
// ============================================================

/// Height still to be eased in for a step taken at `step_time`.
pub fn step_offset(step: f32, step_time: i32, current_time: i32) -> f32 {
    let delta = current_time - step_time;
    if delta < 0 || delta >= STEP_SMOOTH_MS {
        return 0.0;
    }
    step * (STEP_SMOOTH_MS - delta) as f32 / STEP_SMOOTH_MS as f32
}

/// Origin to render from: the prediction with the blended miss and any
/// unfinished stair step taken back out.
pub fn view_origin(
    predicted_origin: &Vec3,
    error: &PredictionError,
    predicted_step: f32,
    predicted_step_time: i32,
    current_time: i32,
    smooth_ms: i32,
) -> Vec3 {
    let offset = error.view_offset(current_time, smooth_ms);
    let mut origin = [
        predicted_origin[0] - offset[0],
        predicted_origin[1] - offset[1],
        predicted_origin[2] - offset[2],
    ];
    origin[2] -= step_offset(predicted_step, predicted_step_time, current_time);
    origin
}
