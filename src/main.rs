use iced::futures::channel::mpsc::Sender;
use iced::widget::image::Handle;
use iced::widget::scrollable::Viewport;
use iced::widget::{self, button, column, container, row, scrollable, text, Column, Row, Space};
use iced::{window, Alignment, ContentFit, Element, Length, Size, Subscription, Task, Theme};
use parking_lot::Mutex;
use rfd::FileDialog;
use std::collections::HashMap;
use std::ops::Range;
use std::path::PathBuf;
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::time::Duration;

use album_grid::art::{
    Bitmap, CacheKey, CellState, CompletionHub, FolderArtResolver, ImageCrateDecoder,
    ThumbnailEvent, ThumbnailService,
};
use album_grid::state::config::Config;
use album_grid::state::data::Album;
use album_grid::state::import::{import_folder_async, ImportResult};
use album_grid::state::library::Library;
use album_grid::ui::viewport::{GridGeometry, GridItem, ViewportCoordinator};

/// Space between cells, horizontally and vertically
const SPACING: f32 = 12.0;
/// Room under each thumbnail for title and artist
const CAPTION_HEIGHT: f32 = 36.0;
/// Approximate height of the toolbar above the grid
const TOOLBAR_HEIGHT: f32 = 64.0;
/// Padding around the grid content, including above the first row
const PADDING: f32 = 16.0;
const MIN_CELL: u32 = 64;
const MAX_CELL: u32 = 512;
const ZOOM_STEP: u32 = 32;

/// Main application state
struct AlbumGrid {
    /// The music catalog
    library: Library,
    config: Config,
    /// Where zoom changes are persisted (None if there is no config dir)
    config_path: Option<PathBuf>,
    /// Process-wide thumbnail cache, shared with the coordinator
    service: Arc<ThumbnailService>,
    /// Loader threads post here; its waker drives `Message::ThumbnailsReady`
    hub: Arc<CompletionHub>,
    coordinator: ViewportCoordinator,
    /// Completion notifications posted by the loader threads
    events: Receiver<ThumbnailEvent>,
    albums: Vec<Album>,
    items: Vec<GridItem>,
    /// GPU handles for on-screen thumbnails, rebuilt only when the bitmap changes
    handles: HashMap<CacheKey, (Bitmap, Handle)>,
    grid_size: Size,
    /// Scroll offset of the grid content, padding included
    scroll_y: f32,
    cell_size: u32,
    /// Status message to display to the user
    status: String,
}

/// Application messages (events)
#[derive(Debug, Clone)]
enum Message {
    /// User clicked the "Import Folder" button
    ImportFolder,
    /// Background import completed
    ImportComplete(Result<ImportResult, String>),
    /// User clicked "Clear Thumbnail Cache"
    ClearCache,
    ZoomIn,
    ZoomOut,
    Scrolled(Viewport),
    WindowResized(Size),
    /// A loader thread published a result
    ThumbnailsReady,
    /// Drip-feed timer: drain notifications, issue the next batch
    Tick,
}

impl AlbumGrid {
    /// Create a new instance of the application
    fn new() -> (Self, Task<Message>) {
        let config_path = Config::default_path();
        let config = load_config(config_path.as_deref());

        // The app cannot function without its catalog or its worker threads
        let db_path = Library::default_path().expect("Could not determine user data directory");
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create application data directory");
        }
        let library = Library::open(&db_path)
            .expect("Failed to initialize database. Check permissions and disk space.");

        let hub = Arc::new(CompletionHub::new());
        let events = hub.subscribe();
        let service = ThumbnailService::start(
            config.service_settings(),
            Arc::new(FolderArtResolver),
            Arc::new(ImageCrateDecoder),
            hub.clone(),
        )
        .expect("Failed to start thumbnail loader threads");
        let coordinator =
            ViewportCoordinator::new(Arc::clone(&service), config.coordinator_settings());

        let default_window = iced::window::Settings::default().size;
        let mut app = AlbumGrid {
            library,
            config,
            config_path,
            service,
            hub,
            coordinator,
            events,
            albums: Vec::new(),
            items: Vec::new(),
            handles: HashMap::new(),
            grid_size: Size::new(
                default_window.width,
                default_window.height - TOOLBAR_HEIGHT,
            ),
            scroll_y: 0.0,
            cell_size: config.thumbnail_size.clamp(MIN_CELL, MAX_CELL),
            status: String::new(),
        };

        // Albums whose files were deleted since the last run drop out of the grid
        if let Err(e) = app.library.remove_missing() {
            log::warn!("Failed to check for missing files: {}", e);
        }
        app.reload_albums();
        app.status = format!("Ready. {} albums in library.", app.albums.len());
        log::info!("Album grid initialized with {} albums", app.albums.len());

        (app, Task::none())
    }

    /// Handle application messages and update state
    fn update(&mut self, message: Message) -> Task<Message> {
        match message {
            Message::ImportFolder => {
                let folder = FileDialog::new().set_title("Select Music Folder").pick_folder();

                if let Some(folder_path) = folder {
                    let Some(db_path) = self.library.path().map(PathBuf::from) else {
                        return Task::none();
                    };
                    self.status = format!("Importing from {}...", folder_path.display());
                    return Task::perform(
                        import_folder_async(folder_path, db_path),
                        Message::ImportComplete,
                    );
                }
            }
            Message::ImportComplete(Ok(result)) => {
                self.status = format!(
                    "Import complete! Added {} tracks, skipped {} duplicates.",
                    result.imported_count, result.skipped_count
                );
                if result.imported_count > 0 {
                    // Album keys were regenerated; earlier failures may have art now
                    self.service.clear_negative();
                }
                if let Err(e) = self.library.remove_missing() {
                    log::warn!("Failed to check for missing files: {}", e);
                }
                self.reload_albums();
            }
            Message::ImportComplete(Err(err)) => {
                log::error!("{}", err);
                self.status = err;
            }
            Message::ClearCache => {
                self.service.clear_all();
                self.handles.clear();
                self.status = "Thumbnail cache cleared.".to_string();
                self.refresh_viewport();
            }
            Message::ZoomIn => self.set_cell_size(self.cell_size + ZOOM_STEP),
            Message::ZoomOut => self.set_cell_size(self.cell_size.saturating_sub(ZOOM_STEP)),
            Message::Scrolled(viewport) => {
                self.scroll_y = viewport.absolute_offset().y;
                let bounds = viewport.bounds();
                self.grid_size = Size::new(bounds.width, bounds.height);
                self.refresh_viewport();
            }
            Message::WindowResized(size) => {
                self.grid_size = Size::new(size.width, (size.height - TOOLBAR_HEIGHT).max(0.0));
                self.refresh_viewport();
            }
            Message::ThumbnailsReady => {
                self.drain_events();
                self.sync_handles();
            }
            Message::Tick => {
                self.drain_events();
                self.coordinator.tick();
                self.sync_handles();
            }
        }

        Task::none()
    }

    fn set_cell_size(&mut self, size: u32) {
        let size = size.clamp(MIN_CELL, MAX_CELL);
        if size == self.cell_size {
            return;
        }
        self.cell_size = size;
        self.refresh_viewport();

        self.config.thumbnail_size = size;
        if let Some(path) = &self.config_path {
            if let Err(e) = self.config.save(path) {
                log::warn!("Failed to save settings: {}", e);
            }
        }
    }

    fn reload_albums(&mut self) {
        match self.library.albums() {
            Ok(albums) => {
                self.items = albums.iter().map(Album::grid_item).collect();
                self.albums = albums;
            }
            Err(e) => {
                log::error!("Failed to load albums: {}", e);
                self.status = format!("Failed to load albums: {}", e);
            }
        }
        self.refresh_viewport();
    }

    fn geometry(&self) -> GridGeometry {
        let cell = self.cell_size as f32;
        // Rows start below the top padding
        GridGeometry::fit(
            self.grid_size.width - 2.0 * PADDING,
            self.grid_size.height,
            self.scroll_y - PADDING,
            cell,
            cell + CAPTION_HEIGHT + SPACING,
            SPACING,
        )
    }

    fn refresh_viewport(&mut self) {
        self.drain_events();
        let geometry = self.geometry();
        self.coordinator.refresh(&geometry, &self.items);
        self.sync_handles();
    }

    /// Apply every pending completion notification. Order and duplicates
    /// don't matter; each one only triggers a re-read of the cache.
    fn drain_events(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            self.coordinator.on_event(&event);
        }
    }

    /// Keep GPU handles for drawn cells in step with the cache, dropping
    /// handles for cells that scrolled away.
    fn sync_handles(&mut self) {
        let drawn = self.drawn_range();
        let mut handles = HashMap::with_capacity(drawn.len());

        for item in &self.items[drawn] {
            let state = self.coordinator.cell_state(&item.key);
            let Some(bitmap) = state.bitmap() else {
                continue;
            };
            let handle = match self.handles.remove(&item.key) {
                Some((cached, handle)) if cached.ptr_eq(bitmap) => handle,
                _ => Handle::from_rgba(bitmap.width(), bitmap.height(), bitmap.pixels().to_vec()),
            };
            handles.insert(item.key.clone(), (bitmap.clone(), handle));
        }

        self.handles = handles;
    }

    /// Cells materialised as widgets: the visible rows plus one row each side
    fn drawn_range(&self) -> Range<usize> {
        let geometry = self.geometry();
        let rows = self.drawn_rows(&geometry);
        let start = (rows.start * geometry.columns).min(self.items.len());
        let end = (rows.end * geometry.columns).min(self.items.len());
        start..end
    }

    fn drawn_rows(&self, geometry: &GridGeometry) -> Range<usize> {
        let visible = geometry.visible_rows(self.items.len());
        let total = geometry.row_count(self.items.len());
        visible.start.saturating_sub(1)..(visible.end + 1).min(total)
    }

    /// Build the user interface
    fn view(&self) -> Element<Message> {
        let stats = self.service.stats();
        let toolbar = row![
            button("Import Folder").on_press(Message::ImportFolder).padding(10),
            button("Clear Thumbnail Cache").on_press(Message::ClearCache).padding(10),
            button("-").on_press(Message::ZoomOut).padding(10),
            button("+").on_press(Message::ZoomIn).padding(10),
            text(&self.status).size(14),
            Space::with_width(Length::Fill),
            text(format!(
                "{} thumbnails, {:.1} / {:.0} MiB, {} queued",
                stats.entries,
                stats.bytes as f64 / 1024.0 / 1024.0,
                stats.budget as f64 / 1024.0 / 1024.0,
                stats.queued
            ))
            .size(12),
        ]
        .spacing(10)
        .padding(10)
        .align_y(Alignment::Center);

        let grid = scrollable(self.grid())
            .on_scroll(Message::Scrolled)
            .width(Length::Fill)
            .height(Length::Fill);

        column![toolbar, grid].into()
    }

    /// Only drawn rows become widgets; spacers stand in for the rest so the
    /// scrollbar still reflects the whole library.
    fn grid(&self) -> Element<Message> {
        let geometry = self.geometry();
        let rows = self.drawn_rows(&geometry);
        let total_rows = geometry.row_count(self.items.len());

        let mut grid = Column::new().padding(PADDING);
        grid = grid.push(Space::with_height(rows.start as f32 * geometry.row_height));

        for row_index in rows.clone() {
            let start = row_index * geometry.columns;
            let end = (start + geometry.columns).min(self.albums.len());
            let cells: Vec<Element<Message>> =
                self.albums[start..end].iter().map(|album| self.cell(album)).collect();
            grid = grid.push(
                Row::with_children(cells)
                    .spacing(SPACING)
                    .height(Length::Fixed(geometry.row_height)),
            );
        }

        let below = (total_rows - rows.end) as f32 * geometry.row_height;
        grid = grid.push(Space::with_height(below));
        grid.width(Length::Fill).into()
    }

    fn cell<'a>(&'a self, album: &'a Album) -> Element<'a, Message> {
        let size = self.cell_size as f32;
        let key = album.key();

        let thumbnail: Element<Message> = match self.handles.get(&key) {
            Some((_, handle)) => widget::image(handle.clone())
                .width(Length::Fixed(size))
                .height(Length::Fixed(size))
                .content_fit(ContentFit::Contain)
                .into(),
            None => {
                // Only an outstanding request earns the loading label
                let label = match self.coordinator.cell_state(&key) {
                    CellState::NoArtwork => "No artwork",
                    CellState::Loading => "Loading...",
                    _ => "",
                };
                container(text(label).size(12))
                    .width(Length::Fixed(size))
                    .height(Length::Fixed(size))
                    .center_x(Length::Fixed(size))
                    .center_y(Length::Fixed(size))
                    .style(container::bordered_box)
                    .into()
            }
        };

        column![
            thumbnail,
            text(&album.title).size(13),
            text(format!("{} · {} tracks", album.artist, album.track_count)).size(11),
        ]
        .width(Length::Fixed(size))
        .into()
    }

    fn subscription(&self) -> Subscription<Message> {
        let resize = window::resize_events().map(|(_id, size)| Message::WindowResized(size));
        let wakeups = thumbnail_wakeups(Arc::clone(&self.hub));

        // The timer only runs while visible cells are still loading
        if self.coordinator.needs_tick() {
            let period = Duration::from_millis(self.config.tick_interval_ms);
            let tick = iced::time::every(period).map(|_| Message::Tick);
            Subscription::batch([resize, wakeups, tick])
        } else {
            Subscription::batch([resize, wakeups])
        }
    }

    /// Set the application theme
    fn theme(&self) -> Theme {
        Theme::Dark
    }
}

/// Wake the UI whenever a loader thread posts to the hub. The channel holds
/// one message, so a burst of completions collapses into a single wake-up.
fn thumbnail_wakeups(hub: Arc<CompletionHub>) -> Subscription<Message> {
    Subscription::run_with_id(
        "thumbnail-wakeups",
        iced::stream::channel(1, move |output: Sender<Message>| async move {
            let output = Mutex::new(output);
            hub.set_waker(move || {
                // A full channel already has a wake-up pending
                let _ = output.lock().try_send(Message::ThumbnailsReady);
            });
            std::future::pending::<()>().await;
        }),
    )
}

fn load_config(path: Option<&std::path::Path>) -> Config {
    let Some(path) = path else {
        return Config::default();
    };
    match Config::load(path) {
        Ok(config) => config,
        Err(e) => {
            log::warn!("{}; using default settings", e);
            Config::default()
        }
    }
}

fn init_logger() -> Option<flexi_logger::LoggerHandle> {
    use flexi_logger::{Cleanup, Criterion, Duplicate, FileSpec, Logger, Naming};

    let log_dir = dirs::data_dir()?.join("album-grid");
    std::fs::create_dir_all(&log_dir).ok()?;

    let handle = Logger::try_with_env_or_str("info, iced=error, wgpu_hal=error, wgpu_core=error")
        .ok()?
        .log_to_file(
            FileSpec::default()
                .directory(&log_dir)
                .basename("album-grid")
                .suppress_timestamp(),
        )
        .rotate(Criterion::Size(1024 * 1024), Naming::Numbers, Cleanup::KeepLogFiles(3))
        .duplicate_to_stderr(Duplicate::Warn)
        .start();

    match handle {
        Ok(handle) => Some(handle),
        Err(e) => {
            eprintln!("Failed to start logger: {}", e);
            None
        }
    }
}

fn main() -> iced::Result {
    let _logger = init_logger();
    log::info!("Starting album-grid {}", env!("CARGO_PKG_VERSION"));

    iced::application("Album Grid", AlbumGrid::update, AlbumGrid::view)
        .subscription(AlbumGrid::subscription)
        .theme(AlbumGrid::theme)
        .centered()
        .run_with(AlbumGrid::new)
}
