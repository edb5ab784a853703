//! Hand-off of rotated files to an external tool.

pub mod runner;

pub use runner::{
    ActionTrigger, CommandTrigger, RecordingTrigger, TriggerError, TriggerOutcome,
    DRY_RUN_PLACEHOLDER,
};
