pub mod q_shared;
pub mod qcommon;
pub mod msg;
pub mod cvar;
pub mod pmove;
