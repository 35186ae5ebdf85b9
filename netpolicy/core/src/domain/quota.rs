// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Quota policies and billing periods
//!
//! A [`QuotaPolicy`] is keyed by (network type, identity) and measured over a
//! recurring [`PeriodDuration`]. Callers submit [`QuotaPolicyRequest`]s with
//! raw wire values; [`QuotaPolicyRequest::into_policy`] validates and
//! normalizes them.

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::error::NetPolicyError;

/// Byte threshold not configured.
pub const DATA_USAGE_UNKNOWN: i64 = -1;
/// Byte threshold that can never be crossed.
pub const DATA_USAGE_UNLIMITED: i64 = i64::MAX;
/// Remind timestamp for "never reminded".
pub const REMIND_NEVER: i64 = -1;
/// Period applied by [`QuotaPolicy::reset`].
pub const DEFAULT_PERIOD: &str = "M1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum NetBearType {
    Cellular,
    Wifi,
    Bluetooth,
    Ethernet,
    Vpn,
    WifiAware,
}

impl NetBearType {
    pub const fn as_i32(self) -> i32 {
        match self {
            NetBearType::Cellular => 0,
            NetBearType::Wifi => 1,
            NetBearType::Bluetooth => 2,
            NetBearType::Ethernet => 3,
            NetBearType::Vpn => 4,
            NetBearType::WifiAware => 5,
        }
    }
}

impl TryFrom<i32> for NetBearType {
    type Error = NetPolicyError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(NetBearType::Cellular),
            1 => Ok(NetBearType::Wifi),
            2 => Ok(NetBearType::Bluetooth),
            3 => Ok(NetBearType::Ethernet),
            4 => Ok(NetBearType::Vpn),
            5 => Ok(NetBearType::WifiAware),
            other => Err(NetPolicyError::InvalidNetworkType(other)),
        }
    }
}

impl From<NetBearType> for i32 {
    fn from(value: NetBearType) -> Self {
        value.as_i32()
    }
}

impl fmt::Display for NetBearType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NetBearType::Cellular => "cellular",
            NetBearType::Wifi => "wifi",
            NetBearType::Bluetooth => "bluetooth",
            NetBearType::Ethernet => "ethernet",
            NetBearType::Vpn => "vpn",
            NetBearType::WifiAware => "wifi_aware",
        };
        f.write_str(name)
    }
}

impl FromStr for NetBearType {
    type Err = NetPolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cellular" => Ok(NetBearType::Cellular),
            "wifi" => Ok(NetBearType::Wifi),
            "bluetooth" => Ok(NetBearType::Bluetooth),
            "ethernet" => Ok(NetBearType::Ethernet),
            "vpn" => Ok(NetBearType::Vpn),
            "wifi_aware" => Ok(NetBearType::WifiAware),
            other => other
                .parse::<i32>()
                .map_err(|_| NetPolicyError::InvalidNetworkType(-1))
                .and_then(NetBearType::try_from),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitAction {
    #[default]
    AlertOnly,
    AutoBill,
    AccessDisabled,
}

/// Which remind timestamp an update stamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemindType {
    Warning,
    Limit,
}

impl TryFrom<u32> for RemindType {
    type Error = NetPolicyError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(RemindType::Warning),
            2 => Ok(RemindType::Limit),
            other => Err(NetPolicyError::InvalidQuotaPolicy(format!("unknown remind type {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeriodCycle {
    Day,
    Month,
    Year,
}

impl PeriodCycle {
    fn letter(self) -> char {
        match self {
            PeriodCycle::Day => 'D',
            PeriodCycle::Month => 'M',
            PeriodCycle::Year => 'Y',
        }
    }

    fn max_offset(self) -> u32 {
        match self {
            PeriodCycle::Day | PeriodCycle::Month => 31,
            PeriodCycle::Year => 366,
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PeriodParseError {
    #[error("Period duration is empty")]
    Empty,

    #[error("Unknown period cycle '{0}'")]
    UnknownCycle(char),

    #[error("Period offset '{0}' is not a number")]
    BadOffset(String),

    #[error("Period offset {offset} out of range 1..={max}")]
    OutOfRange { offset: u32, max: u32 },
}

/// Billing cycle anchor such as `M1` (monthly, starting on day 1).
///
/// For daily cycles the offset is the hour of day the period begins at,
/// clamped to 23. For monthly cycles it is the day of month, clamped to the
/// month's length. For yearly cycles it is the day of year.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PeriodDuration {
    pub cycle: PeriodCycle,
    pub offset: u32,
}

impl PeriodDuration {
    /// Start of the period containing `now`.
    pub fn period_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let today = now.date_naive();
        match self.cycle {
            PeriodCycle::Day => {
                let hour = self.offset.min(23);
                let start = at_midnight(today) + Duration::hours(i64::from(hour));
                if start > now {
                    start - Duration::days(1)
                } else {
                    start
                }
            }
            PeriodCycle::Month => {
                let start = at_midnight(month_anchor(today.year(), today.month(), self.offset));
                if start > now {
                    let (year, month) = previous_month(today.year(), today.month());
                    at_midnight(month_anchor(year, month, self.offset))
                } else {
                    start
                }
            }
            PeriodCycle::Year => {
                let start = at_midnight(year_anchor(today.year(), self.offset));
                if start > now {
                    at_midnight(year_anchor(today.year() - 1, self.offset))
                } else {
                    start
                }
            }
        }
    }

    /// [`Self::period_start`] as a unix timestamp in seconds.
    pub fn period_start_secs(&self, now: DateTime<Utc>) -> i64 {
        self.period_start(now).timestamp()
    }
}

impl Default for PeriodDuration {
    fn default() -> Self {
        Self {
            cycle: PeriodCycle::Month,
            offset: 1,
        }
    }
}

fn at_midnight(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(chrono::NaiveTime::MIN))
}

fn previous_month(year: i32, month: u32) -> (i32, u32) {
    if month == 1 {
        (year - 1, 12)
    } else {
        (year, month - 1)
    }
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|first| first.pred_opt())
        .map(|last| last.day())
        .unwrap_or(28)
}

fn month_anchor(year: i32, month: u32, day: u32) -> NaiveDate {
    let day = day.clamp(1, days_in_month(year, month));
    NaiveDate::from_ymd_opt(year, month, day).unwrap_or(NaiveDate::MIN)
}

fn year_anchor(year: i32, ordinal: u32) -> NaiveDate {
    let days = if NaiveDate::from_yo_opt(year, 366).is_some() { 366 } else { 365 };
    NaiveDate::from_yo_opt(year, ordinal.clamp(1, days)).unwrap_or(NaiveDate::MIN)
}

impl FromStr for PeriodDuration {
    type Err = PeriodParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chars = s.chars();
        let letter = chars.next().ok_or(PeriodParseError::Empty)?;
        let cycle = match letter {
            'D' => PeriodCycle::Day,
            'M' => PeriodCycle::Month,
            'Y' => PeriodCycle::Year,
            other => return Err(PeriodParseError::UnknownCycle(other)),
        };
        let digits = chars.as_str();
        let offset: u32 = digits
            .parse()
            .map_err(|_| PeriodParseError::BadOffset(digits.to_string()))?;
        let max = cycle.max_offset();
        if offset == 0 || offset > max {
            return Err(PeriodParseError::OutOfRange { offset, max });
        }
        Ok(Self { cycle, offset })
    }
}

impl TryFrom<String> for PeriodDuration {
    type Error = PeriodParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PeriodDuration> for String {
    fn from(value: PeriodDuration) -> Self {
        value.to_string()
    }
}

impl fmt::Display for PeriodDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.cycle.letter(), self.offset)
    }
}

/// Quota policy as submitted by a caller, before validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaPolicyRequest {
    pub net_type: i32,
    #[serde(default)]
    pub identity: String,
    #[serde(default = "default_period")]
    pub period_duration: String,
    #[serde(default = "unknown_bytes")]
    pub warning_bytes: i64,
    #[serde(default = "unknown_bytes")]
    pub limit_bytes: i64,
    #[serde(default = "never")]
    pub last_warning_remind: i64,
    #[serde(default = "never")]
    pub last_limit_remind: i64,
    #[serde(default)]
    pub metered: bool,
    #[serde(default)]
    pub limit_action: LimitAction,
}

fn default_period() -> String {
    DEFAULT_PERIOD.to_string()
}

fn unknown_bytes() -> i64 {
    DATA_USAGE_UNKNOWN
}

fn never() -> i64 {
    REMIND_NEVER
}

impl QuotaPolicyRequest {
    pub fn new(net_type: NetBearType, identity: impl Into<String>) -> Self {
        Self {
            net_type: net_type.as_i32(),
            identity: identity.into(),
            period_duration: default_period(),
            warning_bytes: DATA_USAGE_UNKNOWN,
            limit_bytes: DATA_USAGE_UNKNOWN,
            last_warning_remind: REMIND_NEVER,
            last_limit_remind: REMIND_NEVER,
            metered: false,
            limit_action: LimitAction::AlertOnly,
        }
    }

    /// Validate the raw fields and normalize thresholds.
    pub fn into_policy(self) -> Result<QuotaPolicy, NetPolicyError> {
        let net_type = NetBearType::try_from(self.net_type)?;
        let period: PeriodDuration = self
            .period_duration
            .parse()
            .map_err(|e: PeriodParseError| NetPolicyError::InvalidQuotaPolicy(e.to_string()))?;
        let mut policy = QuotaPolicy {
            net_type,
            identity: self.identity,
            period,
            warning_bytes: self.warning_bytes,
            limit_bytes: self.limit_bytes,
            last_warning_remind: self.last_warning_remind,
            last_limit_remind: self.last_limit_remind,
            metered: self.metered,
            limit_action: self.limit_action,
        };
        policy.normalize();
        Ok(policy)
    }
}

impl From<QuotaPolicy> for QuotaPolicyRequest {
    fn from(policy: QuotaPolicy) -> Self {
        Self {
            net_type: policy.net_type.as_i32(),
            identity: policy.identity,
            period_duration: policy.period.to_string(),
            warning_bytes: policy.warning_bytes,
            limit_bytes: policy.limit_bytes,
            last_warning_remind: policy.last_warning_remind,
            last_limit_remind: policy.last_limit_remind,
            metered: policy.metered,
            limit_action: policy.limit_action,
        }
    }
}

/// Validated quota policy for one (network type, identity) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaPolicy {
    pub net_type: NetBearType,
    pub identity: String,
    pub period: PeriodDuration,
    pub warning_bytes: i64,
    pub limit_bytes: i64,
    pub last_warning_remind: i64,
    pub last_limit_remind: i64,
    pub metered: bool,
    pub limit_action: LimitAction,
}

impl QuotaPolicy {
    pub fn new(net_type: NetBearType, identity: impl Into<String>) -> Self {
        let mut policy = Self {
            net_type,
            identity: identity.into(),
            period: PeriodDuration::default(),
            warning_bytes: DATA_USAGE_UNKNOWN,
            limit_bytes: DATA_USAGE_UNKNOWN,
            last_warning_remind: REMIND_NEVER,
            last_limit_remind: REMIND_NEVER,
            metered: false,
            limit_action: LimitAction::AlertOnly,
        };
        policy.normalize();
        policy
    }

    pub fn matches(&self, net_type: NetBearType, identity: &str) -> bool {
        self.net_type == net_type && self.identity == identity
    }

    pub fn has_limit(&self) -> bool {
        self.limit_bytes != DATA_USAGE_UNKNOWN && self.limit_bytes != DATA_USAGE_UNLIMITED
    }

    /// Force thresholds and action into a consistent shape.
    pub fn normalize(&mut self) {
        if self.limit_bytes == DATA_USAGE_UNKNOWN || self.limit_bytes == DATA_USAGE_UNLIMITED {
            self.limit_bytes = DATA_USAGE_UNLIMITED;
            self.limit_action = LimitAction::AlertOnly;
            if self.warning_bytes == DATA_USAGE_UNKNOWN {
                self.warning_bytes = DATA_USAGE_UNLIMITED;
            }
            return;
        }
        if self.warning_bytes == DATA_USAGE_UNKNOWN {
            self.warning_bytes = self.limit_bytes / 10 * 9;
        }
        if self.warning_bytes > self.limit_bytes {
            self.warning_bytes = DATA_USAGE_UNLIMITED;
        }
    }

    pub fn is_over_limit(&self, used_bytes: i64) -> bool {
        self.has_limit() && used_bytes >= self.limit_bytes
    }

    pub fn is_over_warning(&self, used_bytes: i64) -> bool {
        self.warning_bytes != DATA_USAGE_UNLIMITED
            && self.warning_bytes != DATA_USAGE_UNKNOWN
            && used_bytes >= self.warning_bytes
    }

    pub fn period_start_secs(&self, now: DateTime<Utc>) -> i64 {
        self.period.period_start_secs(now)
    }

    /// Limit already reminded within the period starting at `period_start`.
    pub fn limit_reminded_since(&self, period_start: i64) -> bool {
        self.last_limit_remind != REMIND_NEVER && self.last_limit_remind >= period_start
    }

    /// Warning already reminded within the period starting at `period_start`.
    pub fn warning_reminded_since(&self, period_start: i64) -> bool {
        self.last_warning_remind != REMIND_NEVER && self.last_warning_remind >= period_start
    }

    /// Bytes left before the limit in the current period.
    pub fn remaining(&self, used_bytes: i64, period_start: i64) -> i64 {
        if !self.has_limit() || self.limit_reminded_since(period_start) {
            return DATA_USAGE_UNLIMITED;
        }
        (self.limit_bytes - used_bytes).max(0)
    }

    pub fn stamp_remind(&mut self, remind: RemindType, now: i64) {
        match remind {
            RemindType::Warning => self.last_warning_remind = now,
            RemindType::Limit => self.last_limit_remind = now,
        }
    }

    /// Back to default thresholds, keeping the key.
    pub fn reset(&mut self) {
        *self = QuotaPolicy::new(self.net_type, std::mem::take(&mut self.identity));
    }
}
