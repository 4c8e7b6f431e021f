//! Robots.txt handling
//!
//! Rules are fetched through a [`RobotsSource`], cached per host in the
//! durable store by the politeness tracker, and evaluated with
//! [`RobotsRules`]. Every failure to obtain a robots.txt fails open.

mod parser;
mod source;

pub use parser::RobotsRules;
pub use source::{robots_url_for, HttpRobotsSource, RobotsSource, MAX_ROBOTS_BYTES};
