//! Compute builders and loop-schedule templates for tunable implementations.

pub mod conv2d;
pub mod dense;

use tracing::debug;
use ts_ir::ComputeGraph;

use crate::error::{Result, ScheduleError};
use crate::records::SelectedConfig;
use crate::schedule::Schedule;
use crate::space::ConfigEntity;

pub use conv2d::{conv2d_nchwc, schedule_conv_nchwc, Conv2dWorkload, ConvOutputLayout};
pub use dense::{dense_nopack, dense_pack, schedule_dense_nopack, schedule_dense_pack};

/// Result of a compute builder: the graph plus, for tunable builders, the
/// configuration it was sized with. The schedule builder reads the config
/// from here rather than from any ambient state.
#[derive(Debug, Clone)]
pub struct ComputeOutput {
    pub graph: ComputeGraph,
    pub config: Option<SelectedConfig>,
}

impl ComputeOutput {
    pub fn new(graph: ComputeGraph) -> Self {
        ComputeOutput {
            graph,
            config: None,
        }
    }

    pub fn with_config(graph: ComputeGraph, config: SelectedConfig) -> Self {
        ComputeOutput {
            graph,
            config: Some(config),
        }
    }

    pub fn entity(&self) -> Result<&ConfigEntity> {
        self.config
            .as_ref()
            .map(|c| &c.entity)
            .ok_or_else(|| ScheduleError::Other("compute output carries no config".to_string()))
    }
}

/// Schedule for implementations without tunable knobs: every stage keeps
/// its natural loop nest.
pub fn default_schedule(output: &ComputeOutput) -> Result<Schedule> {
    debug!(outputs = ?output.graph.outputs(), "default schedule");
    Ok(Schedule::create(&output.graph))
}
