pub mod icons;
pub mod status;

pub use status::{
    render_burndown, render_gate_run, render_planned_sprint, render_status, render_transition,
};
