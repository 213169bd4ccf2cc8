// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;

/// Request and write counters shared by every connection.
///
/// Each counter is independent; readers may see a slightly stale combination but never a torn
/// value. Nothing reads these for control decisions.
#[derive(Debug, Default)]
pub struct IntakeMetrics {
    total_requests: AtomicU64,
    failed_requests: AtomicU64,
    rejected_requests: AtomicU64,
    successful_logs: AtomicU64,
    failed_logs: AtomicU64,
    last_request_unix_ms: AtomicU64,
    cumulative_response_time_us: AtomicU64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub failed_requests: u64,
    pub rejected_requests: u64,
    pub successful_logs: u64,
    pub failed_logs: u64,
    /// 0 until the first intake request
    pub last_request_unix_ms: u64,
    pub cumulative_response_time_us: u64,
    pub average_response_time_us: u64,
}

impl IntakeMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        self.last_request_unix_ms.store(now_ms, Ordering::Relaxed);
    }

    /// A request that was authenticated but could not be turned into a stored record.
    pub fn record_failed_request(&self) {
        self.failed_requests.fetch_add(1, Ordering::Relaxed);
    }

    /// A request turned away before processing (bad credentials or rate limited).
    pub fn record_rejected_request(&self) {
        self.rejected_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_successful_log(&self) {
        self.successful_logs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed_log(&self) {
        self.failed_logs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_response_time(&self, elapsed: Duration) {
        self.cumulative_response_time_us
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let total_requests = self.total_requests.load(Ordering::Relaxed);
        let cumulative_response_time_us = self.cumulative_response_time_us.load(Ordering::Relaxed);
        MetricsSnapshot {
            total_requests,
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
            rejected_requests: self.rejected_requests.load(Ordering::Relaxed),
            successful_logs: self.successful_logs.load(Ordering::Relaxed),
            failed_logs: self.failed_logs.load(Ordering::Relaxed),
            last_request_unix_ms: self.last_request_unix_ms.load(Ordering::Relaxed),
            cumulative_response_time_us,
            average_response_time_us: cumulative_response_time_us
                .checked_div(total_requests)
                .unwrap_or_default(),
        }
    }
}
