use crate::types::Contract;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Fixed-capacity FIFO: once full, each push overwrites the oldest entry.
#[derive(Clone, Debug)]
pub struct BoundedLog<T> {
    slots: Vec<T>,
    head: usize, // index of the oldest entry once the buffer is full
    cap: usize,
}

impl<T> BoundedLog<T> {
    pub fn new(cap: usize) -> Self {
        Self { slots: Vec::with_capacity(cap), head: 0, cap }
    }

    pub fn push(&mut self, item: T) {
        if self.cap == 0 {
            return;
        }
        if self.slots.len() < self.cap {
            self.slots.push(item);
        } else {
            self.slots[self.head] = item;
            self.head = (self.head + 1) % self.cap;
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.cap
    }

    /// Oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        let (newer, older) = self.slots.split_at(self.head);
        older.iter().chain(newer.iter())
    }
}

impl<T: Clone> BoundedLog<T> {
    pub fn to_vec(&self) -> Vec<T> {
        self.iter().cloned().collect()
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestType {
    #[serde(rename = "NEGOTIATE CONTRACT")]
    NegotiateContract,
    #[serde(rename = "POST BLOCK")]
    PostBlock,
    #[serde(rename = "GET BLOCK")]
    GetBlock,
    #[serde(rename = "DELETE BLOCK")]
    DeleteBlock,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    pub request_type: RequestType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_id: Option<String>,
    pub renter_id: String,
    pub time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract: Option<Contract>,
}

impl Activity {
    pub fn new(request_type: RequestType, renter_id: &str) -> Self {
        Self {
            request_type,
            block_id: None,
            renter_id: renter_id.to_string(),
            time: Utc::now(),
            contract: None,
        }
    }

    pub fn with_block(mut self, block_id: &str) -> Self {
        self.block_id = Some(block_id.to_string());
        self
    }

    pub fn with_contract(mut self, contract: &Contract) -> Self {
        self.contract = Some(contract.clone());
        self
    }
}
