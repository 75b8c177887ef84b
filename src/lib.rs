/// Volcano monitoring alarms.
///
/// Each alarm is a self-contained detector run once per invocation: the
/// infrasound array alarm, the tremor locator and the earthquake swarm
/// clusterer. They share one run/notify contract (`alarms`), one
/// configuration format (`config`) and one set of outbound collaborators
/// (`notify`).

pub mod alarms;
pub mod alert;
pub mod analysis;
pub mod catalog;
pub mod config;
pub mod geometry;
pub mod ingest;
pub mod logging;
pub mod model;
pub mod notify;
pub mod quality;
pub mod stations;
