use std::{cell::RefCell, collections::HashMap, rc::Rc};

use rand::{rngs::StdRng, Rng, SeedableRng};

use super::*;
use crate::{
    config::NullRegion,
    protocol::ClientId,
    utils::{arena::ArenaKey, Size},
};

fn client() -> ClientId {
    ClientId::from_parts(0, 0)
}

fn object(id: u32) -> ObjectId {
    ObjectId {
        client: client(),
        protocol_id: id,
    }
}

fn rect(x: i32, y: i32, w: i32, h: i32) -> Rectangle<i32, Logical> {
    Rectangle::from_raw(x, y, w, h)
}

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Debug, Default)]
struct Renderer {
    damage: Vec<(SurfaceId, Rectangle<i32, Logical>)>,
    bound: Vec<(SurfaceId, PixmapId)>,
    commits: usize,
    no_target: bool,
}

impl CompositorHandler for Renderer {
    fn damage(&mut self, surface: SurfaceId, rect: Rectangle<i32, Logical>) {
        self.damage.push((surface, rect));
    }

    fn buffer_bound(&mut self, surface: SurfaceId, pixmap: PixmapId) {
        self.bound.push((surface, pixmap));
    }

    fn has_render_target(&self, _surface: SurfaceId) -> bool {
        !self.no_target
    }

    fn commit(&mut self, _surface: SurfaceId) {
        self.commits += 1;
    }
}

#[derive(Debug, Clone, Default)]
struct RecordingShell(Rc<RefCell<Vec<String>>>);

impl RecordingShell {
    fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.0.borrow_mut())
    }
}

impl ShellSurface for RecordingShell {
    fn configure(&mut self, size: Size<i32, Logical>) {
        self.0.borrow_mut().push(format!("configure {}x{}", size.w, size.h));
    }
    fn map(&mut self) {
        self.0.borrow_mut().push("map".into());
    }
    fn unmap(&mut self) {
        self.0.borrow_mut().push("unmap".into());
    }
    fn activate(&mut self) {
        self.0.borrow_mut().push("activate".into());
    }
    fn deactivate(&mut self) {
        self.0.borrow_mut().push("deactivate".into());
    }
    fn ping(&mut self) {
        self.0.borrow_mut().push("ping".into());
    }
}

fn buffer(state: &mut CompositorState, id: u32, width: i32, height: i32) -> BufferId {
    state
        .create_buffer(
            object(id),
            BufferAttributes {
                offset: 0,
                width,
                height,
                stride: width * 4,
                format: 0,
            },
        )
        .unwrap()
}

fn releases(events: &EventQueue) -> Vec<u32> {
    events
        .iter()
        .filter_map(|(_, event)| match event {
            Event::BufferRelease { buffer } => Some(*buffer),
            _ => None,
        })
        .collect()
}

fn cleared_region(state: &mut CompositorState, id: u32) -> RegionId {
    let region = state.create_region(object(id)).unwrap();
    state.region_subtract(region, rect(0, 0, 1920, 1080)).unwrap();
    assert!(state.region(region).unwrap().is_empty());
    region
}

fn setup() -> (CompositorState, SurfaceId, Renderer) {
    init_logging();
    let mut state = CompositorState::new(CompositorConfig::default());
    let surface = state.create_surface(object(10), 1).unwrap();
    (state, surface, Renderer::default())
}

#[test]
fn attach_commit_replaces_and_releases() {
    let (mut state, surface, mut renderer) = setup();
    let a = buffer(&mut state, 20, 64, 64);
    let b = buffer(&mut state, 21, 64, 64);

    state.attach(surface, Some(a), 0, 0).unwrap();
    state.commit(surface, &mut renderer).unwrap();
    let pixmap = state.surface(surface).unwrap().pixmap();
    assert!(state.pixmaps().get(pixmap).unwrap().is_usable());
    assert_eq!(state.buffers().busy(a), Some(1));
    assert!(state.take_events().is_empty());
    assert_eq!(renderer.bound, vec![(surface, pixmap)]);

    state.attach(surface, Some(b), 0, 0).unwrap();
    state.commit(surface, &mut renderer).unwrap();
    assert_eq!(state.buffers().busy(a), Some(0));
    assert_eq!(state.buffers().busy(b), Some(1));
    assert_eq!(releases(&state.take_events()), vec![20]);
}

#[test]
fn reattach_over_pending_releases_staged_buffer() {
    let (mut state, surface, _) = setup();
    let a = buffer(&mut state, 20, 64, 64);
    let b = buffer(&mut state, 21, 64, 64);

    state.attach(surface, Some(a), 0, 0).unwrap();
    state.attach(surface, Some(b), 0, 0).unwrap();
    assert_eq!(state.buffers().busy(a), Some(0));
    assert_eq!(releases(&state.take_events()), vec![20]);
    assert_eq!(state.surface(surface).unwrap().pending().buffer(), Some(b));
}

#[test]
fn busy_count_tracks_slots() {
    init_logging();
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let mut state = CompositorState::new(CompositorConfig::default());
    let mut renderer = Renderer::default();
    let mut next_id = 100;
    let mut surfaces: Vec<SurfaceId> = (0..3)
        .map(|i| state.create_surface(object(10 + i), 1).unwrap())
        .collect();
    let mut buffers: Vec<(u32, BufferId)> = (0..4).map(|i| (20 + i, buffer(&mut state, 20 + i, 8, 8))).collect();

    for _ in 0..2000 {
        let busy_before: HashMap<BufferId, u32> = buffers
            .iter()
            .map(|(_, id)| (*id, state.buffers().busy(*id).unwrap()))
            .collect();

        let surface = surfaces[rng.gen_range(0..surfaces.len())];
        match rng.gen_range(0..10) {
            0..=3 => {
                let buffer = if rng.gen_bool(0.2) {
                    None
                } else {
                    Some(buffers[rng.gen_range(0..buffers.len())].1)
                };
                state.attach(surface, buffer, 0, 0).unwrap();
            }
            4..=6 => state.commit(surface, &mut renderer).unwrap(),
            7 => state.render_complete(0),
            8 => {
                let idx = rng.gen_range(0..surfaces.len());
                state.destroy_surface(surfaces[idx]).unwrap();
                next_id += 1;
                surfaces[idx] = state.create_surface(object(next_id), 1).unwrap();
            }
            _ => {
                let idx = rng.gen_range(0..buffers.len());
                state.destroy_buffer(object(buffers[idx].0));
                next_id += 1;
                buffers[idx] = (next_id, buffer(&mut state, next_id, 8, 8));
            }
        }

        let released = releases(&state.take_events());
        for (protocol_id, id) in &buffers {
            let slots = surfaces
                .iter()
                .map(|s| {
                    let data = state.surface(*s).unwrap();
                    (data.pending().buffer() == Some(*id)) as u32 + (data.current().buffer() == Some(*id)) as u32
                })
                .sum::<u32>();
            let busy = state.buffers().busy(*id).unwrap();
            assert_eq!(busy, slots);

            let count = released.iter().filter(|r| *r == protocol_id).count();
            match busy_before.get(id) {
                Some(before) if *before > 0 && busy == 0 => assert_eq!(count, 1),
                _ => assert_eq!(count, 0),
            }
        }
    }
}

#[test]
fn map_and_unmap_fire_once() {
    let (mut state, surface, mut renderer) = setup();
    let shell = RecordingShell::default();
    state.bind_shell(surface, Box::new(shell.clone())).unwrap();
    let a = buffer(&mut state, 20, 30, 20);

    state.attach(surface, Some(a), 0, 0).unwrap();
    state.commit(surface, &mut renderer).unwrap();
    assert_eq!(shell.take(), vec!["configure 30x20", "map"]);
    assert!(state.surface(surface).unwrap().is_mapped());

    state.commit(surface, &mut renderer).unwrap();
    state.attach(surface, Some(a), 0, 0).unwrap();
    state.commit(surface, &mut renderer).unwrap();
    assert!(shell.take().is_empty());

    state.attach(surface, None, 0, 0).unwrap();
    state.commit(surface, &mut renderer).unwrap();
    assert_eq!(shell.take(), vec!["unmap"]);
    assert!(!state.surface(surface).unwrap().is_mapped());

    state.attach(surface, None, 0, 0).unwrap();
    state.commit(surface, &mut renderer).unwrap();
    assert!(shell.take().is_empty());
}

#[test]
fn configure_only_on_size_change() {
    let (mut state, surface, mut renderer) = setup();
    let shell = RecordingShell::default();
    state.bind_shell(surface, Box::new(shell.clone())).unwrap();
    let small = buffer(&mut state, 20, 10, 10);
    let small_too = buffer(&mut state, 21, 10, 10);
    let big = buffer(&mut state, 22, 40, 10);

    state.attach(surface, Some(small), 0, 0).unwrap();
    state.commit(surface, &mut renderer).unwrap();
    shell.take();

    state.attach(surface, Some(small_too), 0, 0).unwrap();
    state.commit(surface, &mut renderer).unwrap();
    assert!(shell.take().is_empty());

    state.attach(surface, Some(big), 0, 0).unwrap();
    state.commit(surface, &mut renderer).unwrap();
    assert_eq!(shell.take(), vec!["configure 40x10"]);
}

#[test]
fn damage_is_clipped_to_surface() {
    let (mut state, surface, mut renderer) = setup();
    let a = buffer(&mut state, 20, 100, 100);
    state.attach(surface, Some(a), 0, 0).unwrap();
    state.damage(surface, rect(90, 90, 50, 50)).unwrap();
    state.damage(surface, rect(-10, -10, 5, 5)).unwrap();
    state.damage(surface, rect(200, 0, 10, 10)).unwrap();
    state.commit(surface, &mut renderer).unwrap();

    assert_eq!(renderer.damage, vec![(surface, rect(90, 90, 10, 10))]);
    assert!(state.surface(surface).unwrap().pending().damage.is_empty());
}

#[test]
fn overlapping_damage_forwards_bounding_box() {
    let (mut state, surface, mut renderer) = setup();
    let a = buffer(&mut state, 20, 100, 100);
    state.attach(surface, Some(a), 0, 0).unwrap();
    state.commit(surface, &mut renderer).unwrap();

    state.damage(surface, rect(10, 10, 5, 5)).unwrap();
    state.damage(surface, rect(12, 12, 5, 5)).unwrap();
    state.commit(surface, &mut renderer).unwrap();

    assert_eq!(renderer.damage, vec![(surface, rect(10, 10, 7, 7))]);
}

#[test]
fn damage_waits_for_render_target() {
    let (mut state, surface, mut renderer) = setup();
    let a = buffer(&mut state, 20, 100, 100);
    state.attach(surface, Some(a), 0, 0).unwrap();
    renderer.no_target = true;
    state.damage(surface, rect(0, 0, 10, 10)).unwrap();
    state.commit(surface, &mut renderer).unwrap();
    assert!(renderer.damage.is_empty());

    state.damage(surface, rect(50, 50, 10, 10)).unwrap();
    renderer.no_target = false;
    state.commit(surface, &mut renderer).unwrap();
    assert_eq!(renderer.damage.len(), 2);
}

#[test]
fn commit_without_attach_still_applies_regions() {
    let (mut state, surface, mut renderer) = setup();
    let a = buffer(&mut state, 20, 100, 100);
    state.attach(surface, Some(a), 0, 0).unwrap();
    state.commit(surface, &mut renderer).unwrap();
    state.surface_changes(surface);

    // regions start out covering the output, carve the top and left bands away
    let region = state.create_region(object(30)).unwrap();
    state.region_subtract(region, rect(0, 0, 1920, 50)).unwrap();
    state.region_subtract(region, rect(0, 0, 50, 1080)).unwrap();
    state.set_input_region(surface, Some(region)).unwrap();
    state.commit(surface, &mut renderer).unwrap();

    let current = state.surface(surface).unwrap().current();
    assert_eq!(current.input_rects, vec![rect(50, 50, 50, 50)]);
    let changes = state.surface_changes(surface);
    assert!(changes.contains(SurfaceChanges::INPUT_SHAPE));
    assert!(!changes.contains(SurfaceChanges::BUFFER));
    assert!(state.surface_changes(surface).is_empty());
}

#[test]
fn null_region_policies() {
    let (mut state, surface, mut renderer) = setup();
    let a = buffer(&mut state, 20, 100, 50);
    state.attach(surface, Some(a), 0, 0).unwrap();
    state.commit(surface, &mut renderer).unwrap();

    let current = state.surface(surface).unwrap().current();
    assert_eq!(current.input_rects, vec![rect(0, 0, 100, 50)]);
    assert!(current.opaque_rects.is_empty());

    let mut config = CompositorConfig::default();
    config.null_opaque_region = NullRegion::FullSurface;
    config.null_input_region = NullRegion::Empty;
    let mut state = CompositorState::new(config);
    let surface = state.create_surface(object(10), 1).unwrap();
    let a = buffer(&mut state, 20, 100, 50);
    state.attach(surface, Some(a), 0, 0).unwrap();
    state.set_opaque_region(surface, None).unwrap();
    state.commit(surface, &mut renderer).unwrap();

    let current = state.surface(surface).unwrap().current();
    assert!(current.input_rects.is_empty());
    assert_eq!(current.opaque_rects, vec![rect(0, 0, 100, 50)]);
}

#[test]
fn new_region_covers_output() {
    let (mut state, surface, mut renderer) = setup();
    let a = buffer(&mut state, 20, 100, 100);
    state.attach(surface, Some(a), 0, 0).unwrap();
    state.commit(surface, &mut renderer).unwrap();

    let region = state.create_region(object(30)).unwrap();
    let data = state.region(region).unwrap();
    assert_eq!(data.area(), 1920 * 1080);
    assert!(data.contains((0, 0)));
    assert!(data.contains((1919, 1079)));
    assert!(!data.contains((1920, 0)));

    state.region_subtract(region, rect(10, 10, 5, 5)).unwrap();
    let data = state.region(region).unwrap();
    assert_eq!(data.area(), 1920 * 1080 - 25);
    assert!(!data.contains((12, 12)));
    assert!(data.contains((15, 12)));

    let fresh = state.create_region(object(31)).unwrap();
    state.set_input_region(surface, Some(fresh)).unwrap();
    state.commit(surface, &mut renderer).unwrap();
    let current = state.surface(surface).unwrap().current();
    assert_eq!(current.input_rects, vec![rect(0, 0, 100, 100)]);
}

#[test]
fn regions_union_into_pending() {
    let (mut state, surface, mut renderer) = setup();
    let a = buffer(&mut state, 20, 100, 100);
    state.attach(surface, Some(a), 0, 0).unwrap();

    let left = cleared_region(&mut state, 30);
    state.region_add(left, rect(0, 0, 10, 100)).unwrap();
    let right = cleared_region(&mut state, 31);
    state.region_add(right, rect(90, 0, 10, 100)).unwrap();
    state.region_subtract(right, rect(90, 50, 10, 50)).unwrap();

    state.set_opaque_region(surface, Some(left)).unwrap();
    state.set_opaque_region(surface, Some(right)).unwrap();
    state.destroy_region(left).unwrap();
    state.commit(surface, &mut renderer).unwrap();

    let opaque = &state.surface(surface).unwrap().current().opaque_rects;
    let area: i32 = opaque.iter().map(|r| r.area()).sum();
    assert_eq!(area, 1000 + 500);
    assert!(matches!(
        state.set_opaque_region(surface, Some(left)),
        Err(CompositorError::DeadRegion)
    ));
}

#[test]
fn render_complete_fires_callbacks_and_releases() {
    let (mut state, surface, mut renderer) = setup();
    let a = buffer(&mut state, 20, 10, 10);
    state.attach(surface, Some(a), 0, 0).unwrap();
    state.frame(surface, object(40)).unwrap();
    state.frame(surface, object(41)).unwrap();
    state.commit(surface, &mut renderer).unwrap();

    state.render_complete(1234);
    let events: Vec<Event> = state.take_events().into_iter().map(|(_, e)| e).collect();
    assert_eq!(
        events,
        vec![
            Event::CallbackDone {
                callback: 40,
                time: 1234
            },
            Event::DeleteId { id: 40 },
            Event::CallbackDone {
                callback: 41,
                time: 1234
            },
            Event::DeleteId { id: 41 },
            Event::BufferRelease { buffer: 20 },
        ]
    );
    assert!(state.surface(surface).unwrap().frame_callbacks().is_empty());
    assert!(state.surface(surface).unwrap().is_mapped());

    // nothing left to fire or release
    state.render_complete(1250);
    assert!(state.take_events().is_empty());
}

#[test]
fn frame_callback_limit() {
    let mut config = CompositorConfig::default();
    config.max_frame_callbacks = 2;
    let mut state = CompositorState::new(config);
    let surface = state.create_surface(object(10), 1).unwrap();
    state.frame(surface, object(40)).unwrap();
    state.frame(surface, object(41)).unwrap();
    assert!(matches!(
        state.frame(surface, object(42)),
        Err(CompositorError::NoMemory)
    ));
    assert_eq!(state.surface(surface).unwrap().frame_callbacks().len(), 2);
}

#[test]
fn destroy_surface_cleans_up() {
    let (mut state, surface, mut renderer) = setup();
    let a = buffer(&mut state, 20, 10, 10);
    let b = buffer(&mut state, 21, 10, 10);
    state.attach(surface, Some(a), 0, 0).unwrap();
    state.commit(surface, &mut renderer).unwrap();
    state.attach(surface, Some(b), 0, 0).unwrap();
    state.frame(surface, object(40)).unwrap();
    let pixmap_id = surface_pixmap_id(1, 10);
    assert_eq!(state.surface_for_pixmap(pixmap_id), Some(surface));

    state.destroy_surface(surface).unwrap();
    let events: Vec<Event> = state.take_events().into_iter().map(|(_, e)| e).collect();
    assert_eq!(
        events,
        vec![
            Event::DeleteId { id: 40 },
            Event::BufferRelease { buffer: 21 },
            Event::BufferRelease { buffer: 20 },
        ]
    );
    assert!(state.surface(surface).is_none());
    assert!(state.pixmaps().is_empty());
    assert_eq!(state.surface_for_pixmap(pixmap_id), None);
    assert!(matches!(state.commit(surface, &mut renderer), Err(CompositorError::DeadSurface)));
    assert!(matches!(
        state.damage(surface, rect(0, 0, 1, 1)),
        Err(CompositorError::DeadSurface)
    ));
}

#[test]
fn destroyed_pending_buffer_commits_as_null() {
    let (mut state, surface, mut renderer) = setup();
    let shell = RecordingShell::default();
    state.bind_shell(surface, Box::new(shell.clone())).unwrap();
    let a = buffer(&mut state, 20, 10, 10);
    let b = buffer(&mut state, 21, 10, 10);
    state.attach(surface, Some(a), 0, 0).unwrap();
    state.commit(surface, &mut renderer).unwrap();
    shell.take();

    state.attach(surface, Some(b), 0, 0).unwrap();
    state.destroy_buffer(object(21));
    assert_eq!(state.surface(surface).unwrap().pending().buffer(), None);

    state.commit(surface, &mut renderer).unwrap();
    assert_eq!(shell.take(), vec!["unmap"]);
    assert_eq!(releases(&state.take_events()), vec![20]);
    assert_eq!(state.buffers().busy(b), None);
}

#[test]
fn attach_of_dead_buffer_changes_nothing() {
    let (mut state, surface, _) = setup();
    let a = buffer(&mut state, 20, 10, 10);
    let b = buffer(&mut state, 21, 10, 10);
    state.attach(surface, Some(a), 3, 4).unwrap();
    state.destroy_buffer(object(21));

    assert!(matches!(
        state.attach(surface, Some(b), 0, 0),
        Err(CompositorError::DeadBuffer)
    ));
    let pending = state.surface(surface).unwrap().pending();
    assert_eq!(pending.buffer(), Some(a));
    assert_eq!(pending.offset, (3, 4).into());
    assert_eq!(state.buffers().busy(a), Some(1));
}

#[test]
fn buffer_scale_and_transform() {
    let (mut state, surface, mut renderer) = setup();
    let a = buffer(&mut state, 20, 200, 100);
    state.attach(surface, Some(a), 0, 0).unwrap();
    state.set_buffer_scale(surface, 2).unwrap();
    state.commit(surface, &mut renderer).unwrap();
    assert_eq!(state.surface(surface).unwrap().current().size, Size::from((100, 50)));

    state.set_buffer_transform(surface, Transform::_90).unwrap();
    state.commit(surface, &mut renderer).unwrap();
    assert_eq!(state.surface(surface).unwrap().current().size, Size::from((50, 100)));
    assert!(state.surface_changes(surface).contains(SurfaceChanges::SIZE));

    assert!(matches!(
        state.set_buffer_scale(surface, 0),
        Err(CompositorError::InvalidScale(0))
    ));
}

#[test]
fn shell_hooks_are_forwarded() {
    let (mut state, surface, _) = setup();
    // no shell bound is fine
    state.activate(surface).unwrap();

    let shell = RecordingShell::default();
    assert!(state.bind_shell(surface, Box::new(shell.clone())).unwrap().is_none());
    state.activate(surface).unwrap();
    state.ping(surface).unwrap();
    state.deactivate(surface).unwrap();
    assert_eq!(shell.take(), vec!["activate", "ping", "deactivate"]);

    assert!(state.unbind_shell(surface).is_some());
    state.ping(surface).unwrap();
    assert!(shell.take().is_empty());
}

#[test]
fn pixmap_is_shared_by_id() {
    let mut state = CompositorState::new(CompositorConfig::default());
    let mut renderer = Renderer::default();
    let surface = state.create_surface(object(10), 7).unwrap();
    let a = buffer(&mut state, 20, 16, 8);
    state.attach(surface, Some(a), 0, 0).unwrap();
    state.commit(surface, &mut renderer).unwrap();

    let pixmap = state.surface(surface).unwrap().pixmap();
    let data = state.pixmaps().get(pixmap).unwrap();
    assert_eq!(data.id(), surface_pixmap_id(7, 10));
    assert_eq!(data.size(), (Size::from((16, 8)), true));
    assert!(data.has_alpha());
    assert!(!data.is_dirty());

    // a render pass drops the buffer but keeps what the pixmap learned from it
    state.render_complete(0);
    assert!(state.refresh_pixmap(pixmap));
    assert!(state.pixmaps().get(pixmap).unwrap().size().1);
}
