//! Protocol parameters and cycle arithmetic.
//!
//! Each protocol covers a height range. A protocol activated in the middle
//! of a cycle keeps the cycle grid of its predecessor: `start_offset` is the
//! position of `start_height` inside `start_cycle`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tzindex_rpc::Constants;

use crate::error::BuildError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Params {
    /// Protocol hash (`Pt…`).
    pub protocol: String,
    pub version: i32,
    pub chain_id: String,
    pub start_height: i64,
    /// Last height of this protocol, `-1` while it is current.
    pub end_height: i64,
    pub start_cycle: i64,
    pub start_offset: i64,
    pub blocks_per_cycle: i64,
    pub blocks_per_snapshot: i64,
    pub cost_per_byte: i64,
    pub preserved_cycles: i64,
    pub origination_size: i64,
    #[serde(default)]
    pub hard_gas_limit_per_operation: i64,
    #[serde(default)]
    pub hard_storage_limit_per_operation: i64,
    #[serde(default)]
    pub minimal_block_delay: i64,
}

impl Params {
    pub fn new(protocol: impl Into<String>, version: i32, chain_id: impl Into<String>) -> Self {
        Self {
            protocol: protocol.into(),
            version,
            chain_id: chain_id.into(),
            start_height: 0,
            end_height: -1,
            start_cycle: 0,
            start_offset: 0,
            blocks_per_cycle: 4096,
            blocks_per_snapshot: 256,
            cost_per_byte: 250,
            preserved_cycles: 5,
            origination_size: 257,
            hard_gas_limit_per_operation: 1_040_000,
            hard_storage_limit_per_operation: 60_000,
            minimal_block_delay: 30,
        }
    }

    /// Take cycle and storage constants from the node.
    pub fn with_constants(mut self, c: &Constants) -> Self {
        if c.blocks_per_cycle > 0 {
            self.blocks_per_cycle = c.blocks_per_cycle;
        }
        if c.blocks_per_roll_snapshot > 0 {
            self.blocks_per_snapshot = c.blocks_per_roll_snapshot;
        }
        self.cost_per_byte = c.cost_per_byte;
        self.preserved_cycles = c.preserved_cycles;
        self.origination_size = c.origination_size;
        self.hard_gas_limit_per_operation = c.hard_gas_limit_per_operation;
        self.hard_storage_limit_per_operation = c.hard_storage_limit_per_operation;
        self.minimal_block_delay = c.minimal_block_delay;
        self
    }

    /// Place the protocol on the chain: first height, its cycle and the
    /// position of that height inside the cycle.
    pub fn with_start(mut self, height: i64, cycle: i64, offset: i64) -> Self {
        self.start_height = height;
        self.start_cycle = cycle;
        self.start_offset = offset;
        self
    }

    /// Height at position 0 of `start_cycle`.
    fn origin(&self) -> i64 {
        self.start_height - self.start_offset
    }

    pub fn height_to_cycle(&self, height: i64) -> i64 {
        self.start_cycle + (height - self.origin()).div_euclid(self.blocks_per_cycle)
    }

    pub fn cycle_start_height(&self, cycle: i64) -> i64 {
        self.origin() + (cycle - self.start_cycle) * self.blocks_per_cycle
    }

    pub fn cycle_end_height(&self, cycle: i64) -> i64 {
        self.cycle_start_height(cycle) + self.blocks_per_cycle - 1
    }

    pub fn cycle_position(&self, height: i64) -> i64 {
        (height - self.origin()).rem_euclid(self.blocks_per_cycle)
    }

    pub fn is_cycle_start(&self, height: i64) -> bool {
        self.cycle_position(height) == 0
    }

    pub fn is_cycle_end(&self, height: i64) -> bool {
        self.cycle_position(height) == self.blocks_per_cycle - 1
    }

    pub fn is_snapshot_block(&self, height: i64) -> bool {
        self.blocks_per_snapshot > 0
            && (self.cycle_position(height) + 1) % self.blocks_per_snapshot == 0
    }

    pub fn contains_height(&self, height: i64) -> bool {
        height >= self.start_height && (self.end_height < 0 || height <= self.end_height)
    }

    pub fn contains_cycle(&self, cycle: i64) -> bool {
        cycle >= self.start_cycle
            && (self.end_height < 0 || cycle <= self.height_to_cycle(self.end_height))
    }
}

// ─── Registry ─────────────────────────────────────────────────────────────────

/// Height → parameters lookup across protocol upgrades.
#[derive(Debug, Clone, Default)]
pub struct ParamsRegistry {
    /// Ordered by `start_height`.
    list: Vec<Arc<Params>>,
}

impl ParamsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a protocol. The previous protocol ends right before it.
    /// Registering the same protocol at the same height again is a no-op.
    pub fn register(&mut self, params: Params) -> Arc<Params> {
        if let Some(p) = self
            .list
            .iter()
            .find(|p| p.protocol == params.protocol && p.start_height == params.start_height)
        {
            return p.clone();
        }
        let params = Arc::new(params);
        self.list.retain(|p| p.start_height < params.start_height);
        if let Some(last) = self.list.last_mut() {
            let mut closed = (**last).clone();
            closed.end_height = params.start_height - 1;
            *last = Arc::new(closed);
        }
        self.list.push(params.clone());
        params
    }

    pub fn for_height(&self, height: i64) -> Result<Arc<Params>, BuildError> {
        self.list
            .iter()
            .rev()
            .find(|p| p.contains_height(height))
            .cloned()
            .ok_or(BuildError::NoParams { height })
    }

    pub fn for_cycle(&self, cycle: i64) -> Result<Arc<Params>, BuildError> {
        self.list
            .iter()
            .rev()
            .find(|p| p.contains_cycle(cycle))
            .cloned()
            .ok_or_else(|| BuildError::not_found("cycle", cycle))
    }

    pub fn for_protocol(&self, protocol: &str) -> Result<Arc<Params>, BuildError> {
        self.list
            .iter()
            .rev()
            .find(|p| p.protocol == protocol)
            .cloned()
            .ok_or_else(|| BuildError::not_found("protocol", protocol))
    }

    pub fn latest(&self) -> Option<Arc<Params>> {
        self.list.last().cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn height_to_cycle(&self, height: i64) -> Result<i64, BuildError> {
        Ok(self.for_height(height)?.height_to_cycle(height))
    }

    pub fn cycle_start_height(&self, cycle: i64) -> Result<i64, BuildError> {
        Ok(self.for_cycle(cycle)?.cycle_start_height(cycle))
    }

    pub fn cycle_end_height(&self, cycle: i64) -> Result<i64, BuildError> {
        Ok(self.for_cycle(cycle)?.cycle_end_height(cycle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn athens() -> Params {
        Params::new("Pt24m4xiPbLDhVgVfABUjirbmda3yohdN82Sp1FeuXXnK6ZZpxn", 4, "NetXdQprcVkpaWU")
            .with_start(458_753, 112, 0)
    }

    fn florence() -> Params {
        Params::new("PsFLorenaUUuikDWvMDr6fGBRG8kt3e3D3fHoXK1j1BFRxeSH4i", 9, "NetXdQprcVkpaWU")
            .with_start(1_466_368, 357, 4095)
    }

    fn registry() -> ParamsRegistry {
        let mut r = ParamsRegistry::new();
        r.register(athens());
        r.register(florence());
        r
    }

    #[test]
    fn cycle_boundaries_aligned_start() {
        let p = athens();
        assert_eq!(p.height_to_cycle(458_753), 112);
        assert_eq!(p.cycle_start_height(112), 458_753);
        assert_eq!(p.cycle_end_height(112), 462_848);
        assert_eq!(p.height_to_cycle(462_848), 112);
        assert_eq!(p.height_to_cycle(462_849), 113);
        assert!(p.is_cycle_start(462_849));
        assert!(p.is_cycle_end(462_848));
    }

    #[test]
    fn protocol_starting_mid_cycle() {
        let p = florence();
        // activation block is the last block of cycle 357
        assert_eq!(p.height_to_cycle(1_466_368), 357);
        assert_eq!(p.cycle_position(1_466_368), 4095);
        assert!(p.is_cycle_end(1_466_368));
        assert_eq!(p.cycle_start_height(357), 1_462_273);
        assert_eq!(p.cycle_start_height(358), 1_466_369);
        assert_eq!(p.height_to_cycle(1_466_369), 358);
    }

    #[test]
    fn every_height_lies_inside_its_cycle() {
        let r = registry();
        let samples = (458_753..458_753 + 9000)
            .step_by(7)
            .chain(1_466_300..1_466_500)
            .chain([1_466_367, 1_466_368, 1_466_369]);
        for h in samples {
            let p = r.for_height(h).unwrap();
            let c = p.height_to_cycle(h);
            assert!(p.cycle_start_height(c) <= h, "height {h}");
            assert!(h <= p.cycle_end_height(c), "height {h}");
            assert!(p.cycle_start_height(c) < p.cycle_end_height(c));
        }
    }

    #[test]
    fn registry_lookups() {
        let r = registry();
        assert_eq!(r.len(), 2);
        assert_eq!(r.for_height(1_466_367).unwrap().version, 4);
        assert_eq!(r.for_height(1_466_368).unwrap().version, 9);
        assert_eq!(r.for_height(2_000_000).unwrap().version, 9);
        assert!(matches!(
            r.for_height(100),
            Err(BuildError::NoParams { height: 100 })
        ));
        assert_eq!(r.for_cycle(200).unwrap().version, 4);
        assert_eq!(r.for_cycle(358).unwrap().version, 9);
        assert!(r.for_protocol("PtUnknown").unwrap_err().is_not_found());
        assert_eq!(r.height_to_cycle(1_466_369).unwrap(), 358);
    }

    #[test]
    fn register_is_idempotent_and_closes_predecessor() {
        let mut r = registry();
        r.register(florence());
        assert_eq!(r.len(), 2);
        assert_eq!(r.for_protocol(&athens().protocol).unwrap().end_height, 1_466_367);
        assert_eq!(r.latest().unwrap().end_height, -1);
    }

    #[test]
    fn constants_override_defaults() {
        let c = Constants {
            blocks_per_cycle: 16384,
            blocks_per_roll_snapshot: 1024,
            cost_per_byte: 250,
            preserved_cycles: 2,
            origination_size: 257,
            ..Default::default()
        };
        let p = Params::new("PtParis", 19, "NetXdQprcVkpaWU").with_constants(&c);
        assert_eq!(p.blocks_per_cycle, 16384);
        assert_eq!(p.blocks_per_snapshot, 1024);
        assert!(p.is_snapshot_block(1023));
    }
}
