//! Tick-driven job scheduling.
//!
//! Keeps one [`Job`](crate::Job) per loaded rule. On every tick the
//! [`JobScheduler`] reports which jobs are due, based on each rule's
//! frequency and a per-job offset that spreads evaluations of rules sharing
//! a frequency across the window. A [`Ticker`] supplies the tick times so
//! that a late wake-up still checks every second it slept through.
//!
//! This module does not run anything. The due jobs are handed to the
//! [`JobDispatcher`](crate::JobDispatcher) through its exec queue.

mod core;
pub(crate) mod offset;
mod ticker;

#[cfg(test)]
mod tests;

pub use self::core::JobScheduler;
pub use self::ticker::Ticker;
