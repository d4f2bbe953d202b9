use crate::error::{Error, Result};
use crate::types::{Block, BlockLocation, Contract, File};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum PlacementPolicy {
    /// Every block of a version on a different provider, so losing one
    /// provider costs at most one shard.
    #[default]
    DistinctProviders,
    /// Providers may hold several blocks; load is balanced by count.
    Spread,
}

/// A fully executed contract the planner may place blocks under.
#[derive(Clone, Debug)]
pub struct ContractSlot {
    pub contract: Contract,
    pub address: String,
    pub remaining: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Assignment {
    pub block_num: usize,
    pub location: BlockLocation,
}

/// Space still free under each contract, given every block the renter's
/// files already place there.
pub fn remaining_capacity<'a>(
    contracts: &[Contract],
    files: impl IntoIterator<Item = &'a File>,
) -> HashMap<String, i64> {
    let mut remaining: HashMap<String, i64> =
        contracts.iter().map(|c| (c.id.clone(), c.storage_space)).collect();
    for f in files {
        for v in &f.versions {
            for b in &v.blocks {
                if let Some(r) = remaining.get_mut(&b.location.contract_id) {
                    *r -= b.size;
                }
            }
        }
    }
    remaining
}

/// Deterministic for a fixed, ordered `slots`: provider order is the order
/// of first appearance, and each provider uses its first contract that fits.
pub fn plan_placement(blocks: &[Block], slots: &[ContractSlot], policy: PlacementPolicy) -> Result<Vec<Assignment>> {
    let mut providers: Vec<&str> = Vec::new();
    for s in slots {
        if !providers.contains(&s.contract.provider_id.as_str()) {
            providers.push(&s.contract.provider_id);
        }
    }
    let needed = match policy {
        PlacementPolicy::DistinctProviders => blocks.len(),
        PlacementPolicy::Spread => blocks.len().min(1),
    };
    if providers.len() < needed {
        return Err(Error::InsufficientContracts { needed, available: providers.len() });
    }

    let mut remaining: Vec<i64> = slots.iter().map(|s| s.remaining).collect();
    let mut load: Vec<usize> = vec![0; providers.len()];
    let mut out = Vec::with_capacity(blocks.len());

    for block in blocks {
        // (provider index, slot index) of every provider that can take this block
        let fits: Vec<(usize, usize)> = providers
            .iter()
            .enumerate()
            .filter(|(pi, _)| policy == PlacementPolicy::Spread || load[*pi] == 0)
            .filter_map(|(pi, pid)| {
                slots
                    .iter()
                    .enumerate()
                    .find(|(si, s)| s.contract.provider_id == *pid && remaining[*si] >= block.size)
                    .map(|(si, _)| (pi, si))
            })
            .collect();
        let chosen = match policy {
            PlacementPolicy::DistinctProviders => fits.first().copied(),
            PlacementPolicy::Spread => fits.iter().copied().min_by_key(|(pi, _)| (load[*pi], *pi)),
        };
        let Some((pi, si)) = chosen else {
            return Err(Error::CapacityExceeded(format!(
                "no contract has {} bytes left for block {}",
                block.size, block.num
            )));
        };
        load[pi] += 1;
        remaining[si] -= block.size;
        let slot = &slots[si];
        out.push(Assignment {
            block_num: block.num,
            location: BlockLocation {
                provider_id: slot.contract.provider_id.clone(),
                address: slot.address.clone(),
                contract_id: slot.contract.id.clone(),
            },
        });
    }
    Ok(out)
}

pub fn apply_assignments(blocks: &mut [Block], assignments: &[Assignment]) {
    for a in assignments {
        if let Some(b) = blocks.iter_mut().find(|b| b.num == a.block_num) {
            b.location = a.location.clone();
        }
    }
}
