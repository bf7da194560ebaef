#![doc = include_str!("../README.md")]

pub mod errors;
pub mod events;
pub mod frames;
pub mod metrics;
pub mod params;
pub mod request;
pub mod scheduler;
pub mod sensor;
pub mod tunables;

pub use cadence_core as core;

pub mod prelude {
    pub use crate::{
        errors::{PipelineError, WaitOutcome},
        events::{
            BufferList, DispatchEvent, DispatchListener, MAX_STREAMS, OutputBuffer, PipeEvent,
            StreamUsage,
        },
        frames::FrameRouter,
        metrics::TimingMetrics,
        params::{CaptureParams, ParamStore, TestPatternMode},
        request::{CameraRequest, ControlLoop, RequestThread, TriggerFlags},
        scheduler::{CameraScheduler, ExecutorDesc, GraphConfig, SchedulerNode, SchedulerPolicy},
        sensor::{ExposureBatch, GainCodes, SensorExposure, SensorHw, SensorManager},
        tunables::{PipelineTunables, TunablesBuilder},
    };
    pub use cadence_core::prelude::*;
}
