//! Image carousel of the detail page: auto-advance, manual navigation with a
//! temporary pause, and a crossfade that keeps the outgoing image briefly.

use std::time::Duration;

use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
    time::{Instant, sleep_until},
};
use tracing::debug;

use crate::dao::models::GameId;

/// Interval between automatic advances.
pub const AUTO_ADVANCE: Duration = Duration::from_secs(3);
/// How long manual navigation suspends auto-advance.
pub const MANUAL_PAUSE: Duration = Duration::from_secs(5);
/// How long the outgoing image stays visible after the index changes.
pub const CROSSFADE: Duration = Duration::from_millis(650);

/// What the carousel area shows.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CarouselView {
    /// The game has no images.
    #[default]
    NoImages,
    /// Image `current` of `total`, at position `index`.
    Showing {
        /// Zero-based position.
        index: usize,
        /// Number of images.
        total: usize,
        /// URL shown.
        current: String,
        /// Outgoing image while the crossfade runs.
        previous: Option<String>,
    },
}

/// Carousel state. Every method takes the current instant, so the struct itself
/// never reads a clock.
#[derive(Debug, Clone)]
pub struct Carousel {
    game_id: Option<GameId>,
    images: Vec<String>,
    index: usize,
    last_advance: Instant,
    paused_until: Option<Instant>,
    fading: Option<(String, Instant)>,
}

impl Carousel {
    /// Empty carousel.
    pub fn new(now: Instant) -> Self {
        Self {
            game_id: None,
            images: Vec::new(),
            index: 0,
            last_advance: now,
            paused_until: None,
            fading: None,
        }
    }

    /// Show the images of `game_id`.
    ///
    /// A different game restarts at index 0; the same game keeps its position
    /// (clamped) so edits to the gallery do not jump back to the start.
    pub fn show(&mut self, game_id: GameId, images: Vec<String>, now: Instant) {
        if self.game_id != Some(game_id) {
            self.game_id = Some(game_id);
            self.index = 0;
            self.paused_until = None;
            self.fading = None;
            self.last_advance = now;
        } else if self.index >= images.len() {
            self.index = 0;
        }
        self.images = images;
    }

    /// Game whose images are loaded.
    pub fn game_id(&self) -> Option<GameId> {
        self.game_id
    }

    /// Position of the current image.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Number of images.
    pub fn len(&self) -> usize {
        self.images.len()
    }

    /// Whether no image is loaded.
    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    /// URL of the current image.
    pub fn current(&self) -> Option<&str> {
        self.images.get(self.index).map(String::as_str)
    }

    /// Outgoing image, while its crossfade window is open.
    pub fn previous(&self, now: Instant) -> Option<&str> {
        self.fading
            .as_ref()
            .filter(|(_, until)| now < *until)
            .map(|(url, _)| url.as_str())
    }

    /// Whether a manual navigation pause is running at `now`.
    pub fn is_paused(&self, now: Instant) -> bool {
        self.paused_until.is_some_and(|until| now < until)
    }

    /// Auto-advance only runs with more than one image.
    pub fn auto_advances(&self) -> bool {
        self.images.len() > 1
    }

    /// Manual step forward, wrapping at the end.
    pub fn next(&mut self, now: Instant) {
        if self.images.is_empty() {
            return;
        }
        let target = (self.index + 1) % self.images.len();
        self.go_to(target, now);
    }

    /// Manual step back, wrapping at the start.
    pub fn prev(&mut self, now: Instant) {
        if self.images.is_empty() {
            return;
        }
        let target = (self.index + self.images.len() - 1) % self.images.len();
        self.go_to(target, now);
    }

    /// Manual jump to `index`; pauses auto-advance for [`MANUAL_PAUSE`].
    pub fn go_to(&mut self, index: usize, now: Instant) {
        if index >= self.images.len() {
            return;
        }
        self.switch_to(index, now);
        self.paused_until = Some(now + MANUAL_PAUSE);
    }

    fn switch_to(&mut self, index: usize, now: Instant) {
        if index != self.index {
            if let Some(outgoing) = self.images.get(self.index) {
                self.fading = Some((outgoing.clone(), now + CROSSFADE));
            }
        }
        self.index = index;
        self.last_advance = now;
    }

    /// Advance the clock to `now`: end an expired pause or crossfade and
    /// auto-advance when due. Returns whether the view changed.
    pub fn tick(&mut self, now: Instant) -> bool {
        let mut changed = false;

        if self.fading.as_ref().is_some_and(|(_, until)| now >= *until) {
            self.fading = None;
            changed = true;
        }

        if let Some(until) = self.paused_until {
            if now < until {
                return changed;
            }
            // Resume counting from the end of the pause.
            self.paused_until = None;
            self.last_advance = until;
        }

        if self.auto_advances() && now >= self.last_advance + AUTO_ADVANCE {
            let target = (self.index + 1) % self.images.len();
            self.switch_to(target, now);
            changed = true;
        }
        changed
    }

    /// Earliest instant at which [`Carousel::tick`] can change anything, or
    /// `None` when no timer is needed.
    pub fn next_deadline(&self) -> Option<Instant> {
        let fade = self.fading.as_ref().map(|(_, until)| *until);
        let advance = self.auto_advances().then(|| match self.paused_until {
            Some(until) => until.max(self.last_advance) + AUTO_ADVANCE,
            None => self.last_advance + AUTO_ADVANCE,
        });
        match (fade, advance) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Render state at `now`.
    pub fn view(&self, now: Instant) -> CarouselView {
        match self.current() {
            None => CarouselView::NoImages,
            Some(current) => CarouselView::Showing {
                index: self.index,
                total: self.images.len(),
                current: current.to_string(),
                previous: self.previous(now).map(str::to_string),
            },
        }
    }
}

#[derive(Debug)]
enum Command {
    Show(GameId, Vec<String>),
    Next,
    Prev,
    GoTo(usize),
}

/// Runs a [`Carousel`] on its own task and publishes its view.
///
/// The task sleeps until the carousel's next deadline; with no deadline (zero
/// or one image, nothing fading) it only waits for commands.
pub struct CarouselDriver {
    handle: CarouselHandle,
    view: watch::Receiver<CarouselView>,
    timer_armed: watch::Receiver<bool>,
    task: JoinHandle<()>,
}

impl CarouselDriver {
    /// Start the driver task.
    pub fn spawn() -> Self {
        let (commands, mut inbox) = mpsc::unbounded_channel();
        let (view_tx, view) = watch::channel(CarouselView::NoImages);
        let (timer_tx, timer_armed) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut carousel = Carousel::new(Instant::now());
            loop {
                let deadline = carousel.next_deadline();
                timer_tx.send_replace(deadline.is_some());

                let command = match deadline {
                    Some(deadline) => tokio::select! {
                        command = inbox.recv() => match command {
                            Some(command) => Some(command),
                            None => break,
                        },
                        _ = sleep_until(deadline) => None,
                    },
                    None => match inbox.recv().await {
                        Some(command) => Some(command),
                        None => break,
                    },
                };

                let now = Instant::now();
                match command {
                    Some(Command::Show(game_id, images)) => carousel.show(game_id, images, now),
                    Some(Command::Next) => carousel.next(now),
                    Some(Command::Prev) => carousel.prev(now),
                    Some(Command::GoTo(index)) => carousel.go_to(index, now),
                    None => {
                        carousel.tick(now);
                    }
                }
                view_tx.send_if_modified(|current| {
                    let next = carousel.view(now);
                    if *current == next {
                        false
                    } else {
                        *current = next;
                        true
                    }
                });
            }
            debug!("carousel driver stopped");
        });

        Self {
            handle: CarouselHandle { commands },
            view,
            timer_armed,
            task,
        }
    }

    /// Command handle that can be moved into other tasks.
    pub fn sender(&self) -> CarouselHandle {
        self.handle.clone()
    }

    /// Load the images of `game_id`.
    pub fn show(&self, game_id: GameId, images: Vec<String>) {
        self.handle.show(game_id, images);
    }

    /// Step forward.
    pub fn next(&self) {
        self.handle.next();
    }

    /// Step back.
    pub fn prev(&self) {
        self.handle.prev();
    }

    /// Jump to `index`.
    pub fn go_to(&self, index: usize) {
        self.handle.go_to(index);
    }

    /// Latest published view.
    pub fn view(&self) -> CarouselView {
        self.view.borrow().clone()
    }

    /// Receiver notified on every view change.
    pub fn watcher(&self) -> watch::Receiver<CarouselView> {
        self.view.clone()
    }

    /// Whether the driver currently waits on a timer.
    pub fn timer_armed(&self) -> bool {
        *self.timer_armed.borrow()
    }

    /// Receiver of [`CarouselDriver::timer_armed`] changes.
    pub fn timer_watcher(&self) -> watch::Receiver<bool> {
        self.timer_armed.clone()
    }
}

/// Cloneable sender of carousel commands.
#[derive(Clone)]
pub struct CarouselHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl CarouselHandle {
    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            debug!("carousel driver already stopped");
        }
    }

    /// Load the images of `game_id`.
    pub fn show(&self, game_id: GameId, images: Vec<String>) {
        self.send(Command::Show(game_id, images));
    }

    /// Step forward.
    pub fn next(&self) {
        self.send(Command::Next);
    }

    /// Step back.
    pub fn prev(&self) {
        self.send(Command::Prev);
    }

    /// Jump to `index`.
    pub fn go_to(&self, index: usize) {
        self.send(Command::GoTo(index));
    }
}

impl Drop for CarouselDriver {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn images(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn navigation_wraps_around() {
        let now = Instant::now();
        let mut carousel = Carousel::new(now);
        carousel.show(1, images(&["A", "B", "C"]), now);

        carousel.next(now);
        carousel.next(now);
        carousel.next(now);
        assert_eq!(carousel.index(), 0);

        carousel.prev(now);
        assert_eq!(carousel.index(), 2);
        assert_eq!(carousel.current(), Some("C"));
    }

    #[test]
    fn auto_advance_every_interval() {
        let start = Instant::now();
        let mut carousel = Carousel::new(start);
        carousel.show(1, images(&["A", "B"]), start);

        assert!(!carousel.tick(start + Duration::from_secs(2)));
        assert!(carousel.tick(start + AUTO_ADVANCE));
        assert_eq!(carousel.index(), 1);
        assert_eq!(carousel.next_deadline(), Some(start + AUTO_ADVANCE + CROSSFADE));
    }

    #[test]
    fn manual_navigation_pauses_then_resumes() {
        let start = Instant::now();
        let mut carousel = Carousel::new(start);
        carousel.show(1, images(&["A", "B", "C"]), start);

        carousel.next(start + Duration::from_secs(1));
        assert!(carousel.is_paused(start + Duration::from_secs(5)));

        // Past the original schedule but still paused.
        carousel.tick(start + Duration::from_secs(4));
        assert_eq!(carousel.index(), 1);

        // Pause ends at 6s, the next advance is due 3s later.
        carousel.tick(start + Duration::from_secs(7));
        assert_eq!(carousel.index(), 1);
        carousel.tick(start + Duration::from_secs(9));
        assert_eq!(carousel.index(), 2);
    }

    #[test]
    fn crossfade_keeps_outgoing_image_briefly() {
        let start = Instant::now();
        let mut carousel = Carousel::new(start);
        carousel.show(1, images(&["A", "B"]), start);

        carousel.next(start);
        assert_eq!(carousel.previous(start + Duration::from_millis(100)), Some("A"));
        assert_eq!(carousel.previous(start + CROSSFADE), None);
        assert!(carousel.tick(start + CROSSFADE));
    }

    #[test]
    fn new_game_restarts_at_first_image() {
        let now = Instant::now();
        let mut carousel = Carousel::new(now);
        carousel.show(1, images(&["A", "B", "C"]), now);
        carousel.next(now);

        carousel.show(1, images(&["A", "B", "C", "D"]), now);
        assert_eq!(carousel.index(), 1);

        carousel.show(2, images(&["X", "Y"]), now);
        assert_eq!(carousel.index(), 0);
        assert!(!carousel.is_paused(now));
    }

    #[test]
    fn no_images_needs_no_timer() {
        let now = Instant::now();
        let mut carousel = Carousel::new(now);
        carousel.show(1, Vec::new(), now);
        assert_eq!(carousel.view(now), CarouselView::NoImages);
        assert_eq!(carousel.next_deadline(), None);

        carousel.next(now);
        assert_eq!(carousel.view(now), CarouselView::NoImages);

        carousel.show(2, images(&["only"]), now);
        assert_eq!(carousel.next_deadline(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn driver_advances_on_its_own() {
        let driver = CarouselDriver::spawn();
        let mut view = driver.watcher();
        driver.show(9, images(&["A", "B"]));

        view.changed().await.unwrap();
        assert!(matches!(&*view.borrow(), CarouselView::Showing { index: 0, .. }));

        view.changed().await.unwrap();
        assert!(matches!(
            &*view.borrow(),
            CarouselView::Showing { index: 1, previous: Some(prev), .. } if prev == "A"
        ));
        assert!(driver.timer_armed());
    }
}
