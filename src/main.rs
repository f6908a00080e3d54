// SPDX-License-Identifier: MPL-2.0-only

mod acquire;
mod compositor;
mod coordinator;
mod library;
mod scaler;
mod topology;
mod video;
mod wayland;

use std::sync::Arc;

use eyre::{OptionExt, bail};
use live_bg_config::Preferences;
use sctk::{
    compositor::{CompositorHandler, CompositorState},
    delegate_compositor, delegate_layer, delegate_output, delegate_registry, delegate_shm,
    output::{OutputHandler, OutputState},
    reexports::{
        calloop::{
            EventLoop,
            channel::{self, Channel},
            signals::{Signal, Signals},
            timer::{TimeoutAction, Timer},
        },
        calloop_wayland_source::WaylandSource,
        client::{
            Connection, QueueHandle,
            globals::registry_queue_init,
            protocol::{wl_output, wl_surface},
        },
    },
    registry::{ProvidesRegistryState, RegistryState},
    registry_handlers,
    shell::{
        WaylandSurface as _,
        wlr_layer::{LayerShell, LayerShellHandler, LayerSurface, LayerSurfaceConfigure},
    },
    shm::{Shm, ShmHandler},
};
use tracing::{debug, debug_span, error, info, warn};

use acquire::{AcquisitionEvent, ManagedStorage};
use compositor::{Command, Compositor, CompositorHandle};
use coordinator::{ApplySource, Applied, Coordinator};
use library::LibraryStore;
use topology::{HostEvent, LIVENESS_INTERVAL};
use video::{GstMedia, MediaInspector};
use wayland::{WaylandHost, WaylandSurface};

const LIBRARY_FILE: &str = "library.ron";

const USAGE: &str = "usage: live-bg [--apply <path-or-url>] [--title <title>]";

/// Command line of the daemon.
#[derive(Debug, Default, PartialEq, Eq)]
struct Args {
    apply: Option<String>,
    title: Option<String>,
}

impl Args {
    fn parse(mut args: impl Iterator<Item = String>) -> eyre::Result<Self> {
        let mut parsed = Self::default();

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--apply" => {
                    parsed.apply = Some(args.next().ok_or_eyre("--apply expects a path or URL")?);
                }
                "--title" => {
                    parsed.title = Some(args.next().ok_or_eyre("--title expects a value")?);
                }
                "-h" | "--help" => {
                    println!("{USAGE}");
                    std::process::exit(0);
                }
                other => bail!("unexpected argument `{other}`\n{USAGE}"),
            }
        }

        if parsed.title.is_some() && parsed.apply.is_none() {
            bail!("--title only makes sense with --apply\n{USAGE}");
        }

        Ok(parsed)
    }
}

fn init_logger() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn,live_bg=info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn load_preferences() -> Preferences {
    match Preferences::helper() {
        Ok(context) => Preferences::load(&context),
        Err(why) => {
            warn!(?why, "preferences unavailable, falling back to defaults");
            Preferences::default()
        }
    }
}

fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    init_logger();

    let args = Args::parse(std::env::args().skip(1))?;

    let media = GstMedia::new()?;
    let prefs = load_preferences();

    let data_root = acquire::data_root().ok_or_eyre("no data directory for the library")?;
    let store = Arc::new(LibraryStore::open(data_root.join(LIBRARY_FILE))?);
    let storage = ManagedStorage::new(&data_root);
    info!(root = %data_root.display(), wallpapers = store.len(), "opened library");

    let conn = Connection::connect_to_env()?;
    let (globals, event_queue) = registry_queue_init(&conn)?;
    let qh = event_queue.handle();

    let mut event_loop: EventLoop<LiveBg> = EventLoop::try_new()?;

    WaylandSource::new(conn, event_queue)
        .insert(event_loop.handle())
        .map_err(|err| err.error)?;

    let (events_tx, events) = channel::channel::<AcquisitionEvent>();
    insert_acquisition_events(&event_loop, events)?;

    let (handle, commands) = CompositorHandle::new();
    insert_commands(&event_loop, commands)?;

    insert_timers(&event_loop)?;
    insert_signals(&event_loop)?;
    watch_preferences(&event_loop, handle);

    let host = WaylandHost::new(
        OutputState::new(&globals, &qh),
        CompositorState::bind(&globals, &qh)?,
        LayerShell::bind(&globals, &qh)?,
        Shm::bind(&globals, &qh)?,
        qh,
    );

    let inspector: Arc<dyn MediaInspector> = Arc::new(media);
    let coordinator = Coordinator::new(store, storage, inspector, events_tx, prefs.clone());

    let mut state = LiveBg {
        registry_state: RegistryState::new(&globals),
        host,
        compositor: Compositor::new(media, prefs.default_aspect),
        coordinator,
        exit: false,
    };

    match args.apply {
        Some(input) => {
            let source = ApplySource::parse(&input, args.title);
            match state.coordinator.apply(source, &mut state.compositor) {
                Ok(Applied::Now(record)) => info!(record = %record.id, "applied wallpaper"),
                Ok(Applied::Pending(ticket)) => {
                    info!(request = ticket.request, title = %ticket.title, "acquiring wallpaper");
                }
                Err(why) => error!(%input, %why, "failed to apply wallpaper"),
            }
        }
        None => {
            state.coordinator.reapply_last_if_available(&mut state.compositor);
        }
    }

    while !state.exit {
        event_loop.dispatch(None, &mut state)?;
    }

    info!("shutting down");
    Ok(())
}

fn insert_acquisition_events(
    event_loop: &EventLoop<LiveBg>,
    events: Channel<AcquisitionEvent>,
) -> eyre::Result<()> {
    event_loop
        .handle()
        .insert_source(events, |event, (), state| {
            if let channel::Event::Msg(event) = event {
                state.coordinator.handle_event(event, &mut state.compositor);
            }
        })
        .map_err(|err| err.error)?;
    Ok(())
}

fn insert_commands(event_loop: &EventLoop<LiveBg>, commands: Channel<Command>) -> eyre::Result<()> {
    event_loop
        .handle()
        .insert_source(commands, |event, (), state| {
            if let channel::Event::Msg(command) = event {
                debug!(?command, "running redispatched command");
                state.compositor.execute(command);
            }
        })
        .map_err(|err| err.error)?;
    Ok(())
}

fn insert_timers(event_loop: &EventLoop<LiveBg>) -> eyre::Result<()> {
    event_loop
        .handle()
        .insert_source(
            Timer::from_duration(LIVENESS_INTERVAL),
            |_, (), state: &mut LiveBg| {
                let _span = debug_span!("liveness").entered();
                let touched = state.compositor.check_liveness(&mut state.host);
                if touched > 0 {
                    debug!(touched, "re-asserted wallpaper surfaces");
                }
                TimeoutAction::ToDuration(LIVENESS_INTERVAL)
            },
        )
        .map_err(|err| err.error)?;

    event_loop
        .handle()
        .insert_source(Timer::immediate(), |_, (), state: &mut LiveBg| {
            let _span = debug_span!("frame_pump").entered();
            state.compositor.render_frame();
            if let Some(why) = state.compositor.take_error() {
                state.coordinator.playback_failed(&why);
            }
            TimeoutAction::ToDuration(state.compositor.frame_interval())
        })
        .map_err(|err| err.error)?;

    Ok(())
}

/// `SIGUSR1`/`SIGUSR2` stand for the host going to sleep and waking up.
fn insert_signals(event_loop: &EventLoop<LiveBg>) -> eyre::Result<()> {
    let signals = Signals::new(&[
        Signal::SIGINT,
        Signal::SIGTERM,
        Signal::SIGUSR1,
        Signal::SIGUSR2,
    ])?;

    event_loop
        .handle()
        .insert_source(signals, |event, (), state| match event.signal() {
            Signal::SIGUSR1 => {
                info!("sleep requested, pausing playback");
                state
                    .compositor
                    .handle_host_event(HostEvent::Sleep, &mut state.host);
            }
            Signal::SIGUSR2 => {
                info!("wake requested, resuming playback");
                state
                    .compositor
                    .handle_host_event(HostEvent::Wake, &mut state.host);
            }
            signal => {
                info!(?signal, "received termination signal");
                state.exit = true;
            }
        })
        .map_err(|err| err.error)?;

    Ok(())
}

/// Reloads the preferences whenever another process writes them.
fn watch_preferences(event_loop: &EventLoop<LiveBg>, handle: CompositorHandle) {
    let context = match Preferences::helper() {
        Ok(context) => context,
        Err(why) => {
            warn!(?why, "not watching preferences");
            return;
        }
    };

    let source = match cosmic_config::calloop::ConfigWatchSource::new(&context) {
        Ok(source) => source,
        Err(why) => {
            warn!(?why, "failed to watch preferences");
            return;
        }
    };

    let inserted = event_loop
        .handle()
        .insert_source(source, move |(config, keys), (), state: &mut LiveBg| {
            let prefs = Preferences::load(&config);
            debug!(?keys, ?prefs, "preferences changed");

            if prefs.default_aspect != state.compositor.aspect_mode() {
                handle.set_aspect_mode(prefs.default_aspect);
            }
            state.coordinator.set_preferences(prefs);
        });

    if let Err(why) = inserted {
        warn!(why = %why.error, "failed to insert preference watcher");
    }
}

pub struct LiveBg {
    registry_state: RegistryState,
    host: WaylandHost,
    compositor: Compositor<GstMedia, WaylandSurface>,
    coordinator: Coordinator<channel::Sender<AcquisitionEvent>>,
    exit: bool,
}

impl LiveBg {
    fn surface_mut(&mut self, wl_surface: &wl_surface::WlSurface) -> Option<&mut WaylandSurface> {
        self.compositor
            .tracker_mut()
            .surfaces_mut()
            .map(|(_, surface)| surface)
            .find(|surface| surface.layer().wl_surface() == wl_surface)
    }

    fn displays_changed(&mut self) {
        self.compositor
            .handle_host_event(HostEvent::DisplaysChanged, &mut self.host);
    }
}

impl CompositorHandler for LiveBg {
    fn scale_factor_changed(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        _surface: &wl_surface::WlSurface,
        _new_factor: i32,
    ) {
    }

    fn transform_changed(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        _surface: &wl_surface::WlSurface,
        _new_transform: wl_output::Transform,
    ) {
    }

    fn frame(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        _surface: &wl_surface::WlSurface,
        _time: u32,
    ) {
    }

    fn surface_enter(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        surface: &wl_surface::WlSurface,
        output: &wl_output::WlOutput,
    ) {
        if let Some(surface) = self.surface_mut(surface) {
            if surface.output() == output {
                surface.set_on_output(true);
            }
        }
    }

    fn surface_leave(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        surface: &wl_surface::WlSurface,
        output: &wl_output::WlOutput,
    ) {
        if let Some(surface) = self.surface_mut(surface) {
            if surface.output() == output {
                // picked up by the next liveness check
                surface.set_on_output(false);
            }
        }
    }
}

impl OutputHandler for LiveBg {
    fn output_state(&mut self) -> &mut OutputState {
        &mut self.host.output_state
    }

    fn new_output(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        _output: wl_output::WlOutput,
    ) {
        self.displays_changed();
    }

    fn update_output(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        _output: wl_output::WlOutput,
    ) {
        self.displays_changed();
    }

    fn output_destroyed(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        output: wl_output::WlOutput,
    ) {
        self.host.forget(&output);
        self.displays_changed();
    }
}

impl LayerShellHandler for LiveBg {
    fn closed(&mut self, _conn: &Connection, _qh: &QueueHandle<Self>, layer: &LayerSurface) {
        if let Some(surface) = self.surface_mut(layer.wl_surface()) {
            debug!("layer surface closed by the compositor");
            surface.mark_closed();
        }
    }

    fn configure(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        layer: &LayerSurface,
        configure: LayerSurfaceConfigure,
        _serial: u32,
    ) {
        let Some(surface) = self.surface_mut(layer.wl_surface()) else {
            return;
        };

        let first = !surface.is_configured();
        if surface.configure(configure.new_size) || first {
            debug!(size = ?configure.new_size, first, "layer surface configured");
            self.compositor.reattach();
        }
    }
}

impl ShmHandler for LiveBg {
    fn shm_state(&mut self) -> &mut Shm {
        &mut self.host.shm
    }
}

delegate_compositor!(LiveBg);
delegate_output!(LiveBg);
delegate_shm!(LiveBg);

delegate_layer!(LiveBg);

delegate_registry!(LiveBg);

impl ProvidesRegistryState for LiveBg {
    fn registry(&mut self) -> &mut RegistryState {
        &mut self.registry_state
    }
    registry_handlers![OutputState];
}
