//! Redis connection health tracking

use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU8, Ordering};

use crate::metrics::REDIS_CONNECTION_STATUS;

/// Redis connection health status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RedisHealthStatus {
    /// Last operation on the shared connection succeeded
    Healthy = 0,
    /// No usable connection; the next call reconnects
    Reconnecting = 1,
}

impl RedisHealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RedisHealthStatus::Healthy => "healthy",
            RedisHealthStatus::Reconnecting => "reconnecting",
        }
    }
}

/// Redis health tracker shared by the pool and the health endpoint
pub struct RedisHealth {
    status: AtomicU8,
    last_connected: AtomicI64,
    reconnection_attempts: AtomicU32,
    total_reconnections: AtomicU32,
}

impl RedisHealth {
    pub fn new() -> Self {
        Self {
            status: AtomicU8::new(RedisHealthStatus::Reconnecting as u8),
            last_connected: AtomicI64::new(0),
            reconnection_attempts: AtomicU32::new(0),
            total_reconnections: AtomicU32::new(0),
        }
    }

    /// Mark Redis as connected
    pub fn set_connected(&self) {
        let previous = self
            .status
            .swap(RedisHealthStatus::Healthy as u8, Ordering::AcqRel);
        self.last_connected
            .store(chrono::Utc::now().timestamp_millis(), Ordering::Release);

        if previous != RedisHealthStatus::Healthy as u8 {
            self.total_reconnections.fetch_add(1, Ordering::AcqRel);
        }
        self.reconnection_attempts.store(0, Ordering::Release);
        REDIS_CONNECTION_STATUS.set(1);
    }

    /// Mark Redis as reconnecting
    pub fn set_reconnecting(&self) {
        self.status
            .store(RedisHealthStatus::Reconnecting as u8, Ordering::Release);
        self.reconnection_attempts.fetch_add(1, Ordering::AcqRel);
        REDIS_CONNECTION_STATUS.set(0);
    }

    pub fn status(&self) -> RedisHealthStatus {
        match self.status.load(Ordering::Acquire) {
            0 => RedisHealthStatus::Healthy,
            _ => RedisHealthStatus::Reconnecting,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status() == RedisHealthStatus::Healthy
    }

    /// Get statistics snapshot
    pub fn stats(&self) -> RedisHealthStats {
        RedisHealthStats {
            status: self.status(),
            last_connected_ms: self.last_connected.load(Ordering::Acquire),
            reconnection_attempts: self.reconnection_attempts.load(Ordering::Acquire),
            total_reconnections: self.total_reconnections.load(Ordering::Acquire),
        }
    }
}

impl Default for RedisHealth {
    fn default() -> Self {
        Self::new()
    }
}

/// Redis health statistics
#[derive(Debug, Clone)]
pub struct RedisHealthStats {
    pub status: RedisHealthStatus,
    pub last_connected_ms: i64,
    pub reconnection_attempts: u32,
    pub total_reconnections: u32,
}
