/// Signal processing and detection algorithms.
///
/// These routines take traces, measurements and events as plain values and
/// return plain values; they never fetch data or notify anyone. The alarms
/// in `crate::alarms` wire them together.
///
/// Submodules:
/// - `filter`: demean, taper, Butterworth filters, resampling, envelopes.
/// - `xcorr`: pairwise cross-correlation with lag gating.
/// - `association`: largest consistent station group by combinatorial voting.
/// - `inversion`: least-squares plane-wave slowness inversion.
/// - `locator`: envelope-correlation grid search with bootstrap scatter.
/// - `swarm`: DBSCAN in scaled space-time and swarm deduplication.

pub mod association;
pub mod filter;
pub mod inversion;
pub mod locator;
pub mod swarm;
pub mod xcorr;
