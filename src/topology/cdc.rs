//! CDC generation ledger
//!
//! A generation is staged while `commit cdc generation` runs, committed into the
//! unpublished list (kept sorted by timestamp), and later published, which makes
//! it the generation nodes should be writing with.

use crate::errors::{Result, TopologyError};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identity of a CDC generation: the time it becomes active plus its data id
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CdcGenerationId {
    /// Milliseconds since the epoch at which the generation starts operating
    pub ts: u64,
    pub id: Uuid,
}

impl fmt::Display for CdcGenerationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.ts, self.id)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CdcGenerationLedger {
    /// Last published generation
    pub current_cdc_generation_id: Option<CdcGenerationId>,

    /// Data id of the generation being introduced by the current `commit cdc generation` phase
    pub new_cdc_generation_data_uuid: Option<Uuid>,

    /// Committed but not yet published generations, sorted by timestamp
    pub unpublished_cdc_generations: Vec<CdcGenerationId>,
}

impl CdcGenerationLedger {
    pub fn stage(&mut self, data_uuid: Uuid) -> Result<()> {
        if let Some(staged) = self.new_cdc_generation_data_uuid {
            return Err(TopologyError::CdcLedger(format!(
                "generation data {} is already staged",
                staged
            )));
        }
        self.new_cdc_generation_data_uuid = Some(data_uuid);
        Ok(())
    }

    /// Commit the staged generation. Its data id must match what was staged.
    pub fn commit(&mut self, generation: CdcGenerationId) -> Result<()> {
        match self.new_cdc_generation_data_uuid {
            Some(staged) if staged == generation.id => {}
            Some(staged) => {
                return Err(TopologyError::CdcLedger(format!(
                    "committing generation {} but {} is staged",
                    generation, staged
                )))
            }
            None => {
                return Err(TopologyError::CdcLedger(format!(
                    "committing generation {} with nothing staged",
                    generation
                )))
            }
        }
        if self.unpublished_cdc_generations.contains(&generation) {
            return Err(TopologyError::CdcLedger(format!(
                "generation {} is already committed",
                generation
            )));
        }

        let pos = self
            .unpublished_cdc_generations
            .partition_point(|g| g.ts <= generation.ts);
        self.unpublished_cdc_generations.insert(pos, generation);
        self.new_cdc_generation_data_uuid = None;
        Ok(())
    }

    /// Publish the earliest unpublished generation and make it current.
    pub fn publish(&mut self) -> Result<CdcGenerationId> {
        if self.unpublished_cdc_generations.is_empty() {
            return Err(TopologyError::CdcLedger(
                "no unpublished generation to publish".to_string(),
            ));
        }
        let generation = self.unpublished_cdc_generations.remove(0);
        self.current_cdc_generation_id = Some(generation);
        Ok(generation)
    }

    pub fn is_sorted(&self) -> bool {
        self.unpublished_cdc_generations
            .windows(2)
            .all(|w| w[0].ts <= w[1].ts)
    }
}
