use crate::notice::Notice;
use crate::session::Session;

/// Everything the UI thread reacts to. Background threads only ever talk to
/// the UI through this channel.
#[derive(Debug)]
pub enum UiEvent {
    /// One command line, from stdin or the control socket.
    Input(String),
    /// Stdin reached end of file.
    InputClosed,
    /// Bytes for the activity pane (from the tail).
    Display(Vec<u8>),
    ScrollToEnd,
    /// Text produced by an admin call, printed as-is.
    Output(String),
    /// Notice already written to the activity log; only the status line
    /// needs updating.
    Status(Notice),
    /// Notice that is shown on its own.
    Notice(Notice),
    Connected(Result<Session, String>),
    Tick,
}
