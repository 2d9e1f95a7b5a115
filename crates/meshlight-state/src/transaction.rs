//! Transaction tracking for retried Set messages
//!
//! A client retransmits a Set with the same TID. Within the aggregation
//! window every message with the same (TID, source) pair belongs to one
//! transaction: the first one acts, the rest are duplicates.

use meshlight_core::{AppKeyIndex, MeshAddress};

/// Default aggregation window
pub const TRANSACTION_WINDOW_MS: u64 = 6_000;

/// Classification of an incoming transactional message
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transaction {
    New,
    Duplicate,
}

/// Framing needed to send an acknowledgement later
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct AckContext {
    pub src: MeshAddress,
    pub app_key_index: AppKeyIndex,
    /// The Set was addressed to a unicast address
    pub for_unicast: bool,
}

#[derive(Clone, Copy, Debug)]
struct LastTransaction {
    tid: u8,
    src: MeshAddress,
    expires_at_ms: u64,
}

/// Per-descriptor transaction state
#[derive(Clone, Debug)]
pub struct TransactionTracker<T> {
    window_ms: u64,
    last: Option<LastTransaction>,
    /// Present value when the current transaction began
    initial: T,
    ack: AckContext,
    ack_pending: bool,
}

impl<T: Copy + Default> TransactionTracker<T> {
    pub fn new(window_ms: u64) -> Self {
        TransactionTracker {
            window_ms,
            last: None,
            initial: T::default(),
            ack: AckContext::default(),
            ack_pending: false,
        }
    }

    /// Classify a message and, for a new transaction, snapshot `present`
    pub fn begin(
        &mut self,
        tid: u8,
        src: MeshAddress,
        app_key_index: AppKeyIndex,
        dst_is_unicast: bool,
        present: T,
        now_ms: u64,
    ) -> Transaction {
        if let Some(last) = self.last {
            if last.tid == tid && last.src == src && now_ms < last.expires_at_ms {
                return Transaction::Duplicate;
            }
        }

        self.last = Some(LastTransaction {
            tid,
            src,
            expires_at_ms: now_ms.saturating_add(self.window_ms),
        });
        self.initial = present;
        self.ack = AckContext {
            src,
            app_key_index,
            for_unicast: dst_is_unicast,
        };
        self.ack_pending = false;
        Transaction::New
    }

    /// Value captured by the first message of the transaction
    pub fn initial_state(&self) -> T {
        self.initial
    }

    pub fn ack_context(&self) -> AckContext {
        self.ack
    }

    /// Owe an acknowledgement once the delay expires
    pub fn set_ack_pending(&mut self, pending: bool) {
        self.ack_pending = pending;
    }

    pub fn ack_pending(&self) -> bool {
        self.ack_pending
    }

    /// Take the owed acknowledgement, if any
    pub fn take_ack(&mut self) -> Option<AckContext> {
        if std::mem::take(&mut self.ack_pending) {
            Some(self.ack)
        } else {
            None
        }
    }

    /// Forget the current transaction (local writes start fresh)
    pub fn reset(&mut self) {
        self.last = None;
        self.ack_pending = false;
    }

    pub fn window_ms(&self) -> u64 {
        self.window_ms
    }
}

impl<T: Copy + Default> Default for TransactionTracker<T> {
    fn default() -> Self {
        Self::new(TRANSACTION_WINDOW_MS)
    }
}
