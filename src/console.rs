//! The UI thread: reads commands, owns the tail and the explorer worker, and
//! draws everything that arrives on the event channel.

use std::io::{self, Write};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use futures::channel::mpsc::{UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};

use crate::broker::{BrokerError, BrokerHandle, ConnectionProvider};
use crate::commands::{self, Command, HELP};
use crate::config::stream_draft::TEMPLATE;
use crate::config::{ConfigError, ConfigStore, ConsoleConfig, Profile, StreamDraft};
use crate::confirm::{Decision, DeleteConfirmation, DeleteTarget};
use crate::display::{ChannelSink, shared};
use crate::events::UiEvent;
use crate::explorer::{ExplorerCommand, ExplorerHandle};
use crate::listing;
use crate::notice::{Level, Notice, StatusLine};
use crate::session::Session;
use crate::tail::Tailer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// Result of a background admin call.
enum Reply {
    Output(String),
    Done(Notice),
}

pub struct Console {
    config: ConsoleConfig,
    store: ConfigStore,
    provider: Arc<dyn ConnectionProvider>,
    demo_profile: Option<Profile>,
    tx: UnboundedSender<UiEvent>,
    out: Box<dyn Write>,
    status: StatusLine,
    tailer: Tailer,
    session: Option<Session>,
    explorer: Option<ExplorerHandle>,
    deletes: DeleteConfirmation<DeleteTarget>,
    connecting: Option<String>,
}

impl Console {
    pub fn new(
        config: ConsoleConfig,
        provider: Arc<dyn ConnectionProvider>,
        demo_profile: Option<Profile>,
        tx: UnboundedSender<UiEvent>,
        out: Box<dyn Write>,
    ) -> Self {
        let tailer = Tailer::new(shared(ChannelSink::new(tx.clone())), config.poll_interval);
        let deletes = {
            let tx = tx.clone();
            DeleteConfirmation::new(crate::confirm::CONFIRM_WINDOW, move |target: DeleteTarget| {
                debug!(%target, "delete confirmation expired");
                let _ = tx.unbounded_send(UiEvent::Notice(Notice::info(
                    "Delete confirmation timed out",
                )));
            })
        };
        Self {
            store: ConfigStore::new(config.profile_dir.clone()),
            config,
            provider,
            demo_profile,
            tx,
            out,
            status: StatusLine::default(),
            tailer,
            session: None,
            explorer: None,
            deletes,
            connecting: None,
        }
    }

    /// Drive the console until `quit` or end of input.
    pub fn run(mut self, rx: UnboundedReceiver<UiEvent>) -> io::Result<()> {
        self.prompt()?;
        for event in futures::executor::block_on_stream(rx) {
            if self.handle(event)? == Flow::Quit {
                break;
            }
        }
        self.shutdown();
        Ok(())
    }

    pub fn handle(&mut self, event: UiEvent) -> io::Result<Flow> {
        match event {
            UiEvent::Input(line) => {
                let flow = match commands::parse(&line) {
                    Ok(Some(cmd)) => self.execute(cmd)?,
                    Ok(None) => Flow::Continue,
                    Err(e) => {
                        self.notify(Notice::warn(e.to_string()))?;
                        Flow::Continue
                    }
                };
                if flow == Flow::Continue {
                    self.prompt()?;
                }
                return Ok(flow);
            }
            UiEvent::InputClosed => return Ok(Flow::Quit),
            UiEvent::Display(bytes) => self.out.write_all(&bytes)?,
            UiEvent::ScrollToEnd => self.out.flush()?,
            UiEvent::Output(text) => {
                writeln!(self.out, "{text}")?;
                self.out.flush()?;
            }
            UiEvent::Status(notice) => self.status.set(notice, Instant::now()),
            UiEvent::Notice(notice) => self.notify(notice)?,
            UiEvent::Connected(result) => self.connected(result)?,
            UiEvent::Tick => {
                if self.status.tick(Instant::now()) {
                    debug!("status line cleared");
                }
            }
        }
        Ok(Flow::Continue)
    }

    fn execute(&mut self, cmd: Command) -> io::Result<Flow> {
        debug!(?cmd, "command");
        match cmd {
            Command::Help => self.print(HELP)?,
            Command::Quit => return Ok(Flow::Quit),
            Command::Profiles => self.list_profiles()?,
            Command::AddProfile { name, url } => {
                let profile = Profile::new(&name, &url);
                match self.store.save(&profile) {
                    Ok(path) => {
                        info!(profile = %name, path = %path.display(), "profile saved");
                        self.notify(Notice::info(format!("Saved profile {name}")))?;
                    }
                    Err(e) => self.notify(Notice::error(e.to_string()))?,
                }
            }
            Command::RemoveProfile(name) => match self.store.remove(&name) {
                Ok(()) => self.notify(Notice::info(format!("Removed profile {name}")))?,
                Err(e) => self.notify(Notice::error(e.to_string()))?,
            },
            Command::Connect(name) => self.connect(&name)?,
            Command::Disconnect => {
                if self.session.is_some() {
                    self.disconnect();
                    self.notify(Notice::info("Disconnected"))?;
                } else {
                    self.notify(not_connected())?;
                }
            }
            Command::ServerInfo => {
                let profile = self.session.as_ref().map(|s| s.profile().to_string());
                self.admin("Failed to load server info", move |broker| {
                    let profile = profile.unwrap_or_default();
                    Ok(Reply::Output(listing::server(&profile, &broker.server_info())))
                })?
            }
            Command::Streams => self.admin("Failed to list streams", |broker| {
                let infos = broker
                    .stream_names()?
                    .iter()
                    .map(|name| broker.stream_info(name))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Reply::Output(listing::streams(&infos)))
            })?,
            Command::StreamInfo(stream) => self.admin("Failed to load stream", move |broker| {
                Ok(Reply::Output(listing::stream_detail(&broker.stream_info(&stream)?)))
            })?,
            Command::Consumers(stream) => {
                self.admin("Failed to list consumers", move |broker| {
                    let names = broker.consumer_names(&stream)?;
                    Ok(Reply::Output(listing::consumers(&stream, &names)))
                })?
            }
            Command::ConsumerInfo { stream, name } => {
                self.admin("Failed to load consumer", move |broker| {
                    let info = broker.consumer_info(&stream, &name)?;
                    Ok(Reply::Output(listing::consumer_detail(&info)))
                })?
            }
            Command::AddStream(json) => {
                match StreamDraft::from_json(&json).and_then(StreamDraft::into_config) {
                    Ok(config) => self.admin("Failed to add stream", move |broker| {
                        let info = broker.add_stream(config)?;
                        Ok(Reply::Done(Notice::info(format!(
                            "Stream {} created",
                            info.config.name
                        ))))
                    })?,
                    Err(e) => {
                        self.config_error(e)?;
                        self.print(&format!("example: add-stream {TEMPLATE}"))?
                    }
                }
            }
            Command::DeleteStream(stream) => self.request_delete(DeleteTarget::Stream(stream))?,
            Command::DeleteConsumer { stream, name } => {
                self.request_delete(DeleteTarget::Consumer { stream, name })?
            }
            Command::Open { stream, filter } => {
                self.explore(ExplorerCommand::Open { stream, filter })?
            }
            Command::Filter(pattern) => self.explore(ExplorerCommand::SetFilter(pattern))?,
            Command::Next => self.explore(ExplorerCommand::Forward)?,
            Command::Prev => self.explore(ExplorerCommand::Backward)?,
            Command::Publish { subject, body } => {
                self.explore(ExplorerCommand::Publish { subject, body })?
            }
            Command::Close => self.explore(ExplorerCommand::Close)?,
        }
        Ok(Flow::Continue)
    }

    fn list_profiles(&mut self) -> io::Result<()> {
        let mut profiles = match self.store.list() {
            Ok(p) => p,
            Err(e) => return self.config_error(e),
        };
        if let Some(demo) = &self.demo_profile {
            profiles.insert(0, demo.clone());
        }
        let connected = self.session.as_ref().map(|s| s.profile().to_string());
        let text = listing::profiles(&profiles, connected.as_deref());
        self.print(&text)
    }

    fn resolve_profile(&self, name: &str) -> Result<Profile, ConfigError> {
        match &self.demo_profile {
            Some(demo) if demo.name == name => Ok(demo.clone()),
            _ => self.store.load(name),
        }
    }

    /// Connect on a background thread; the result comes back as
    /// [`UiEvent::Connected`].
    pub fn connect(&mut self, name: &str) -> io::Result<()> {
        if let Some(pending) = &self.connecting {
            let text = format!("Still connecting to {pending}");
            return self.notify(Notice::info(text));
        }
        let profile = match self.resolve_profile(name) {
            Ok(p) => p,
            Err(e) => return self.config_error(e),
        };
        info!(profile = %profile.name, url = %profile.url, "connecting");
        self.connecting = Some(profile.name.clone());

        let provider = self.provider.clone();
        let log_dir = self.config.log_dir.clone();
        let tx = self.tx.clone();
        thread::spawn(move || {
            let result =
                Session::open(provider.as_ref(), &profile, &log_dir).map_err(|e| e.to_string());
            let _ = tx.unbounded_send(UiEvent::Connected(result));
        });
        self.print(&format!("Connecting to {name}..."))
    }

    fn connected(&mut self, result: Result<Session, String>) -> io::Result<()> {
        self.connecting = None;
        let session = match result {
            Ok(session) => session,
            Err(e) => return self.notify(Notice::error(format!("Failed to connect: {e}"))),
        };
        self.disconnect();

        self.tailer
            .retarget(session.log().path(), Some(session.log_start()));
        let tx = self.tx.clone();
        self.explorer = Some(ExplorerHandle::spawn(
            &session,
            self.config.fetch_wait,
            move |notice| {
                let _ = tx.unbounded_send(UiEvent::Status(notice));
            },
        ));
        let text = format!(
            "Connected to {} (server {}, cluster {}); activity log {}",
            session.profile(),
            session.server().server_id,
            session.server().cluster,
            session.log().path().display()
        );
        self.session = Some(session);
        self.notify(Notice::info(text))
    }

    /// Tear down the explorer, the tail and the session. The explorer
    /// worker finishes its queue and revokes its cursor on its own thread.
    fn disconnect(&mut self) {
        if let Some(explorer) = self.explorer.take() {
            explorer.detach();
        }
        self.tailer.stop();
        self.deletes.disarm();
        if let Some(session) = self.session.take() {
            session.close();
        }
    }

    fn explore(&mut self, cmd: ExplorerCommand) -> io::Result<()> {
        match &self.explorer {
            Some(explorer) if explorer.send(cmd) => Ok(()),
            Some(_) => {
                warn!("explorer worker is gone");
                self.notify(Notice::error("Explorer stopped; reconnect to continue"))
            }
            None => self.notify(not_connected()),
        }
    }

    fn request_delete(&mut self, target: DeleteTarget) -> io::Result<()> {
        if self.session.is_none() {
            return self.notify(not_connected());
        }
        match self.deletes.request(target) {
            Decision::Armed { target, window } => {
                let text = format!(
                    "Press again within {}s to delete {target}",
                    window.as_secs()
                );
                self.notify(Notice::warn(text).with_ttl(window))
            }
            Decision::Execute(target) => {
                let failure = match &target {
                    DeleteTarget::Stream(_) => "Failed to delete stream",
                    DeleteTarget::Consumer { .. } => "Failed to delete consumer",
                };
                self.admin(failure, move |broker| {
                    match &target {
                        DeleteTarget::Stream(stream) => broker.delete_stream(stream)?,
                        DeleteTarget::Consumer { stream, name } => {
                            broker.delete_consumer(stream, name)?
                        }
                    }
                    Ok(Reply::Done(Notice::info(format!("Deleted {target}"))))
                })
            }
        }
    }

    /// Run a broker call off the UI thread.
    fn admin<F>(&mut self, failure: &'static str, job: F) -> io::Result<()>
    where
        F: FnOnce(&BrokerHandle) -> Result<Reply, BrokerError> + Send + 'static,
    {
        let Some(session) = &self.session else {
            return self.notify(not_connected());
        };
        let broker = session.broker().clone();
        let tx = self.tx.clone();
        thread::spawn(move || {
            let event = match job(&broker) {
                Ok(Reply::Output(text)) => UiEvent::Output(text),
                Ok(Reply::Done(notice)) => UiEvent::Notice(notice),
                Err(e) => {
                    warn!(error = %e, "{failure}");
                    UiEvent::Notice(Notice::error(format!("{failure}: {e}")))
                }
            };
            let _ = tx.unbounded_send(event);
        });
        Ok(())
    }

    fn config_error(&mut self, err: ConfigError) -> io::Result<()> {
        warn!(error = %err, "configuration error");
        self.notify(Notice::error(err.to_string()))
    }

    /// Show a notice. While connected it goes through the activity log so
    /// the tail draws it in order with everything else.
    fn notify(&mut self, notice: Notice) -> io::Result<()> {
        let logged = match &self.session {
            Some(session) => match session.log().note(&notice.to_string()) {
                Ok(()) => true,
                Err(e) => {
                    warn!(error = %e, "activity log write failed");
                    false
                }
            },
            None => false,
        };
        if !logged {
            writeln!(self.out, "{notice}")?;
            self.out.flush()?;
        }
        self.status.set(notice, Instant::now());
        Ok(())
    }

    fn print(&mut self, text: &str) -> io::Result<()> {
        writeln!(self.out, "{text}")?;
        self.out.flush()
    }

    fn prompt(&mut self) -> io::Result<()> {
        let status = self
            .status
            .current(Instant::now())
            .filter(|n| n.level != Level::Info)
            .map(|n| format!("[{n}] "))
            .unwrap_or_default();
        let profile = self
            .session
            .as_ref()
            .map(|s| format!("[{}]", s.profile()))
            .unwrap_or_default();
        write!(self.out, "{status}natsdash{profile}> ")?;
        self.out.flush()
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    pub fn shutdown(&mut self) {
        self.disconnect();
        let _ = writeln!(self.out);
        let _ = self.out.flush();
    }
}

fn not_connected() -> Notice {
    Notice::info("Not connected; use 'connect <profile>'")
}
