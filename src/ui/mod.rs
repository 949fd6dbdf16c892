/// Grid view support
///
/// - `viewport.rs` - visible range math and the thumbnail request coordinator

pub mod viewport;
