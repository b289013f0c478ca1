use std::cell::{Cell, RefCell};
use std::io::Cursor;
use std::rc::Rc;
use std::time::{Duration, Instant};

use stagecraft::{
    Easing, Engine, EngineConfig, Event, EventData, EventType, FrameClock, FrameSchedule,
    HeadlessSurface, LoadOptions, LoadPhase, MemorySource, NodeId, PointerButton, PointerPhase,
    SceneRequest, Target, TouchPhase, TouchPoint,
};

type Log = Rc<RefCell<Vec<String>>>;

fn engine() -> Engine {
    engine_with(EngineConfig::default(), MemorySource::new())
}

fn engine_with(config: EngineConfig, source: MemorySource) -> Engine {
    Engine::with_source(config, HeadlessSurface::new(), Box::new(source)).unwrap()
}

fn log_node(engine: &mut Engine, id: NodeId, kind: EventType, label: &str, log: &Log) {
    let (log, label) = (log.clone(), label.to_string());
    engine
        .graph_mut()
        .on(id, kind, move |_, _| {
            log.borrow_mut().push(label.clone());
            Ok(())
        })
        .unwrap();
}

fn log_engine(engine: &mut Engine, kind: EventType, label: &str, log: &Log) {
    let (log, label) = (log.clone(), label.to_string());
    engine.on(kind, move |_, _| {
        log.borrow_mut().push(label.clone());
        Ok(())
    });
}

fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgba8(image::RgbaImage::new(width, height))
        .write_to(&mut out, image::ImageOutputFormat::Png)
        .unwrap();
    out.into_inner()
}

#[test]
fn test_root_scene_cannot_be_popped() {
    let mut e = engine();
    let log: Log = Rc::default();
    let root = e.root_scene();
    log_node(&mut e, root, EventType::Enter, "enter", &log);
    log_node(&mut e, root, EventType::Exit, "exit", &log);

    assert_eq!(e.pop_scene().unwrap(), root);
    assert_eq!(e.scenes(), &[root]);
    assert_eq!(e.current_scene(), root);
    assert_eq!(e.surface().mounted(), &[root]);
    assert!(log.borrow().is_empty());
}

#[test]
fn test_push_and_pop_fire_enter_and_exit() {
    let mut e = engine();
    let log: Log = Rc::default();
    let root = e.root_scene();
    let menu = e.graph_mut().create_scene();
    log_node(&mut e, root, EventType::Enter, "root enter", &log);
    log_node(&mut e, root, EventType::Exit, "root exit", &log);
    log_node(&mut e, menu, EventType::Enter, "menu enter", &log);
    log_node(&mut e, menu, EventType::Exit, "menu exit", &log);

    e.push_scene(menu).unwrap();
    assert_eq!(e.current_scene(), menu);
    assert_eq!(e.surface().mounted(), &[root, menu]);
    assert_eq!(e.graph().scene_of(menu), Some(menu));

    assert_eq!(e.pop_scene().unwrap(), menu);
    assert_eq!(e.current_scene(), root);
    assert_eq!(e.surface().mounted(), &[root]);
    assert_eq!(
        *log.borrow(),
        ["root exit", "menu enter", "menu exit", "root enter"]
    );
}

#[test]
fn test_replace_strips_the_outgoing_scene() {
    let mut e = engine();
    let first = e.graph_mut().create_scene();
    let second = e.graph_mut().create_scene();
    let child = e.graph_mut().create_entity(4.0, 4.0);
    e.graph_mut().add_child(first, child).unwrap();
    e.push_scene(first).unwrap();
    assert_eq!(e.graph().scene_of(child), Some(first));

    e.replace_scene(second).unwrap();
    assert_eq!(e.scenes(), &[e.root_scene(), second]);
    assert!(e.graph().children(first).is_empty());
    assert_eq!(e.graph().parent(child), None);
    assert_eq!(e.graph().scene_of(child), None);
}

#[test]
fn test_replacing_root_strips_its_children() {
    let mut e = engine();
    let root = e.root_scene();
    let child = e.graph_mut().create_group();
    e.graph_mut().add_child(root, child).unwrap();
    let next = e.graph_mut().create_scene();

    e.replace_scene(next).unwrap();
    assert_eq!(e.scenes(), &[root, next]);
    assert!(e.graph().children(root).is_empty());
    assert_eq!(e.graph().parent(child), None);
    assert_eq!(e.graph().scene_of(child), None);
}

#[test]
fn test_root_scene_cannot_be_removed() {
    let mut e = engine();
    let root = e.root_scene();
    let top = e.graph_mut().create_scene();
    e.push_scene(top).unwrap();

    assert_eq!(e.remove_scene(root).unwrap(), None);
    assert_eq!(e.scenes(), &[root, top]);
    assert_eq!(e.pop_scene().unwrap(), top);
    assert_eq!(e.scenes(), &[root]);
    assert_eq!(e.surface().mounted(), &[root]);
}

#[test]
fn test_remove_scene_from_middle_of_stack() {
    let mut e = engine();
    let a = e.graph_mut().create_scene();
    let b = e.graph_mut().create_scene();
    let stray = e.graph_mut().create_scene();
    e.push_scene(a).unwrap();
    e.push_scene(b).unwrap();

    assert_eq!(e.remove_scene(a).unwrap(), Some(a));
    assert_eq!(e.scenes(), &[e.root_scene(), b]);
    assert!(!e.surface().mounted().contains(&a));
    assert_eq!(e.remove_scene(stray).unwrap(), None);

    assert_eq!(e.remove_scene(b).unwrap(), Some(b));
    assert_eq!(e.current_scene(), e.root_scene());
}

#[test]
fn test_frame_walks_current_scene_breadth_first() {
    let mut e = engine();
    let log: Log = Rc::default();
    let scene = e.graph_mut().create_scene();
    let group = e.graph_mut().create_group();
    let inner = e.graph_mut().create_entity(1.0, 1.0);
    let sibling = e.graph_mut().create_entity(1.0, 1.0);
    let elsewhere = e.graph_mut().create_entity(1.0, 1.0);
    {
        let g = e.graph_mut();
        g.add_child(scene, group).unwrap();
        g.add_child(group, inner).unwrap();
        g.add_child(scene, sibling).unwrap();
    }
    let root = e.root_scene();
    e.graph_mut().add_child(root, elsewhere).unwrap();
    e.push_scene(scene).unwrap();

    for (id, label) in [(group, "group"), (inner, "inner"), (sibling, "sibling"), (scene, "scene"), (elsewhere, "elsewhere")] {
        log_node(&mut e, id, EventType::EnterFrame, label, &log);
    }
    log_engine(&mut e, EventType::EnterFrame, "engine", &log);
    log_engine(&mut e, EventType::ExitFrame, "exitframe", &log);

    e.start().unwrap();
    e.tick(Instant::now()).unwrap();

    assert_eq!(
        *log.borrow(),
        ["group", "sibling", "inner", "scene", "engine", "exitframe"]
    );
    assert_eq!(e.frame(), 1);
    let age = |id| e.graph().node(id).unwrap().age();
    assert_eq!((age(group), age(inner), age(scene)), (1, 1, 1));
    assert_eq!(age(elsewhere), 0);
    assert!(e.surface().transform_of(inner).is_some());
}

#[test]
fn test_pause_makes_ticks_no_ops() {
    let mut e = engine();
    e.start().unwrap();
    let t0 = Instant::now();
    e.tick(t0).unwrap();
    e.pause();
    assert!(e.tick(t0 + Duration::from_millis(40)).unwrap().is_some());
    assert_eq!(e.frame(), 1);
    assert_eq!(e.current_time(), Some(t0));

    e.resume();
    e.tick(t0 + Duration::from_millis(80)).unwrap();
    assert_eq!(e.frame(), 2);
}

#[test]
fn test_enter_frame_reports_elapsed_time() {
    let mut e = engine();
    let seen = Rc::new(Cell::new(Duration::MAX));
    let sink = seen.clone();
    e.on(EventType::EnterFrame, move |_, event| {
        sink.set(event.elapsed);
        Ok(())
    });
    let t0 = Instant::now();
    e.start_at(t0).unwrap();
    assert_eq!(e.current_time(), Some(t0));
    e.tick(t0 + Duration::from_millis(20)).unwrap();
    assert_eq!(seen.get(), Duration::from_millis(20));
    e.tick(t0 + Duration::from_millis(70)).unwrap();
    assert_eq!(seen.get(), Duration::from_millis(50));
}

#[test]
fn test_engine_listener_can_stop_the_loop() {
    struct StepClock(Instant);

    impl FrameClock for StepClock {
        fn now(&mut self) -> Instant {
            self.0
        }

        fn wait(&mut self, _schedule: FrameSchedule) {
            self.0 += Duration::from_millis(33);
        }
    }

    let mut e = engine();
    e.on(EventType::ExitFrame, |engine, _| {
        if engine.frame() == 2 {
            engine.stop();
        }
        Ok(())
    });
    e.run(&mut StepClock(Instant::now())).unwrap();
    assert_eq!(e.frame(), 3);
    assert!(!e.is_running());
}

#[test]
fn test_listener_error_aborts_the_frame() {
    let mut e = engine();
    let log: Log = Rc::default();
    let root = e.root_scene();
    let first = e.graph_mut().create_entity(1.0, 1.0);
    let second = e.graph_mut().create_entity(1.0, 1.0);
    e.graph_mut().add_child(root, first).unwrap();
    e.graph_mut().add_child(root, second).unwrap();
    e.graph_mut()
        .on(first, EventType::EnterFrame, |_, _| Err(anyhow::anyhow!("boom")))
        .unwrap();
    log_node(&mut e, second, EventType::EnterFrame, "second", &log);
    log_engine(&mut e, EventType::ExitFrame, "exitframe", &log);

    e.start().unwrap();
    let err = e.tick(Instant::now()).unwrap_err();
    assert_eq!(err.to_string(), "boom");
    assert!(log.borrow().is_empty());
    assert_eq!(e.frame(), 0);
}

#[test]
fn test_node_listener_requests_scene_change() {
    let mut e = engine();
    let level = e.graph_mut().create_scene();
    let hero = e.graph_mut().create_entity(8.0, 8.0);
    e.graph_mut().add_child(level, hero).unwrap();
    e.push_scene(level).unwrap();
    e.graph_mut()
        .on(hero, EventType::EnterFrame, |graph, _| {
            graph.request(SceneRequest::Pop);
            Ok(())
        })
        .unwrap();

    e.start().unwrap();
    e.tick(Instant::now()).unwrap();
    assert_eq!(e.current_scene(), e.root_scene());
}

#[test]
fn test_timeline_advances_with_frames() {
    let mut e = engine();
    let root = e.root_scene();
    let dot = e.graph_mut().create_entity(2.0, 2.0);
    e.graph_mut().add_child(root, dot).unwrap();
    let done = Rc::new(Cell::new(false));
    let flag = done.clone();
    e.graph_mut()
        .tl(dot)
        .unwrap()
        .move_to(30.0, 0.0, 3, Easing::Linear)
        .then(move |_, _| {
            flag.set(true);
            Ok(())
        });

    e.start().unwrap();
    let t0 = Instant::now();
    for i in 0..3u64 {
        e.tick(t0 + Duration::from_millis(33 * i)).unwrap();
    }
    assert_eq!(e.graph().spatial(dot).unwrap().x(), 30.0);
    assert!(!done.get());
    e.tick(t0 + Duration::from_millis(100)).unwrap();
    assert!(done.get());
}

#[test]
fn test_key_events_reach_engine_then_scene() {
    let mut e = engine();
    let log: Log = Rc::default();
    let root = e.root_scene();
    let left_down = EventType::ButtonDown("left".into());
    log_engine(&mut e, EventType::InputStart, "inputstart", &log);
    log_engine(&mut e, EventType::InputEnd, "inputend", &log);
    log_engine(&mut e, left_down.clone(), "engine leftbuttondown", &log);
    log_node(&mut e, root, left_down, "scene leftbuttondown", &log);
    log_node(&mut e, root, EventType::from("leftbuttonup"), "scene leftbuttonup", &log);

    assert!(!e.handle_key(37, true).unwrap());
    e.start().unwrap();

    assert!(e.handle_key(37, true).unwrap());
    assert!(e.handle_key(37, true).unwrap());
    assert!(e.input("left"));
    assert!(e.handle_key(37, false).unwrap());
    assert!(!e.input("left"));
    assert!(!e.handle_key(65, true).unwrap());

    assert_eq!(
        *log.borrow(),
        [
            "inputstart",
            "engine leftbuttondown",
            "scene leftbuttondown",
            "inputend",
            "scene leftbuttonup"
        ]
    );
}

#[test]
fn test_keybind_changes_take_effect() {
    let mut e = engine_with(
        EngineConfig::default().with_keybind(32, "jump"),
        MemorySource::new(),
    );
    e.start().unwrap();
    assert!(e.handle_key(32, true).unwrap());
    assert!(e.input("jump"));

    e.keyunbind(37).keybind(65, "left");
    assert!(!e.handle_key(37, true).unwrap());
    assert!(e.handle_key(65, true).unwrap());
    assert!(e.input("left"));
}

#[test]
fn test_pointer_maps_page_to_stage_and_picks_target() {
    let surface = HeadlessSurface::new().with_origin(10.0, 20.0);
    let config = EngineConfig::default().with_scale(2.0);
    let mut e = Engine::with_source(config, surface, Box::new(MemorySource::new())).unwrap();
    let root = e.root_scene();
    let button = e.graph_mut().create_entity(10.0, 10.0);
    e.graph_mut().spatial_mut(button).unwrap().move_to(5.0, 5.0);
    e.graph_mut().add_child(root, button).unwrap();

    let hits: Rc<RefCell<Vec<(EventType, f32, f32, Option<Target>)>>> = Rc::default();
    for id in [button, root] {
        for kind in [EventType::TouchStart, EventType::TouchMove, EventType::TouchEnd] {
            let hits = hits.clone();
            e.graph_mut()
                .on(id, kind, move |_, ev: &Event| {
                    hits.borrow_mut().push((ev.kind.clone(), ev.x, ev.y, ev.target));
                    Ok(())
                })
                .unwrap();
        }
    }

    assert!(!e.handle_pointer(PointerPhase::Move, PointerButton::Primary, 26.0, 36.0).unwrap());
    assert!(!e.handle_pointer(PointerPhase::Down, PointerButton::Secondary, 26.0, 36.0).unwrap());
    assert!(e.handle_pointer(PointerPhase::Down, PointerButton::Primary, 26.0, 36.0).unwrap());
    assert!(e.handle_pointer(PointerPhase::Move, PointerButton::Primary, 110.0, 120.0).unwrap());
    assert!(e.handle_pointer(PointerPhase::Up, PointerButton::Primary, 110.0, 120.0).unwrap());
    assert!(!e.handle_pointer(PointerPhase::Up, PointerButton::Primary, 110.0, 120.0).unwrap());

    assert_eq!(
        *hits.borrow(),
        [
            (EventType::TouchStart, 8.0, 8.0, Some(Target::Node(button))),
            (EventType::TouchMove, 50.0, 50.0, Some(Target::Node(root))),
            (EventType::TouchEnd, 50.0, 50.0, Some(Target::Node(root))),
        ]
    );
}

#[test]
fn test_touches_carry_identifiers_while_running() {
    let mut e = engine();
    let root = e.root_scene();
    let ids: Rc<RefCell<Vec<Option<i64>>>> = Rc::default();
    let sink = ids.clone();
    e.graph_mut()
        .on(root, EventType::TouchStart, move |_, ev| {
            if let EventData::Touch { identifier } = &ev.data {
                sink.borrow_mut().push(*identifier);
            }
            Ok(())
        })
        .unwrap();

    let touches = [
        TouchPoint { identifier: 3, page_x: 1.0, page_y: 1.0 },
        TouchPoint { identifier: 7, page_x: 2.0, page_y: 2.0 },
    ];
    assert!(!e.handle_touch(TouchPhase::Start, &touches).unwrap());
    e.start().unwrap();
    assert!(e.handle_touch(TouchPhase::Start, &touches).unwrap());
    assert_eq!(*ids.borrow(), [Some(3), Some(7)]);
}

#[test]
fn test_resize_notifies_engine_and_scenes() {
    let mut e = engine();
    let overlay = e.graph_mut().create_scene();
    e.push_scene(overlay).unwrap();
    let seen: Rc<RefCell<Vec<(String, EventData)>>> = Rc::default();

    let sink = seen.clone();
    e.on(EventType::CoreResize, move |_, ev| {
        sink.borrow_mut().push(("engine".into(), ev.data.clone()));
        Ok(())
    });
    for (id, label) in [(e.root_scene(), "root"), (overlay, "overlay")] {
        let sink = seen.clone();
        e.graph_mut()
            .on(id, EventType::CoreResize, move |_, ev| {
                sink.borrow_mut().push((label.into(), ev.data.clone()));
                Ok(())
            })
            .unwrap();
    }

    e.set_width(400.0).unwrap();
    assert_eq!(e.width(), 400.0);
    assert_eq!(e.surface().size(), (400.0, 320.0, 1.0));

    let expected = EventData::Resize { width: 400.0, height: 320.0, scale: 1.0 };
    let labels: Vec<String> = seen.borrow().iter().map(|(l, _)| l.clone()).collect();
    assert_eq!(labels, ["engine", "root", "overlay"]);
    assert!(seen.borrow().iter().all(|(_, data)| *data == expected));
}

#[test]
fn test_preload_gates_load_behind_loading_scene() {
    let source = MemorySource::new()
        .with_file("hero.png", png_bytes(4, 2))
        .with_file("level.json", "{}");
    let mut e = engine_with(EngineConfig::default(), source);
    let progress: Rc<RefCell<Vec<(usize, usize, Option<String>)>>> = Rc::default();
    let loads = Rc::new(Cell::new(0));

    let sink = progress.clone();
    e.on(EventType::Progress, move |_, ev| {
        if let EventData::Progress { phase, loaded, total, path } = &ev.data {
            assert_eq!(*phase, LoadPhase::Preload);
            sink.borrow_mut().push((*loaded, *total, path.clone()));
        }
        Ok(())
    });
    let counter = loads.clone();
    e.on(EventType::Load, move |engine, _| {
        counter.set(counter.get() + 1);
        assert!(engine.has_asset("hero.png"));
        Ok(())
    });

    e.preload(["hero.png", "level.json", "hero.png", ""]);
    e.start().unwrap();
    let loading = e.current_scene();
    assert_ne!(loading, e.root_scene());
    assert_eq!(loads.get(), 0);

    e.block_on_assets().unwrap();
    assert_eq!(loads.get(), 1);
    assert_eq!(e.current_scene(), e.root_scene());
    assert_eq!(*progress.borrow(), [(0, 2, None), (1, 2, None), (2, 2, None)]);
    assert_eq!(e.get_asset("hero.png").unwrap().image_size(), Some((4, 2)));
    assert_eq!(e.get_asset("level.json").unwrap().as_text(), Some("{}"));

    let bar = e.graph().children(loading)[0];
    assert_eq!(e.graph().spatial(bar).unwrap().width, 320.0);
}

#[test]
fn test_custom_loading_scene() {
    let source = MemorySource::new().with_file("a.txt", "a");
    let mut e = engine_with(EngineConfig::default(), source);
    let made: Rc<Cell<Option<NodeId>>> = Rc::default();
    let slot = made.clone();
    e.set_loading_scene(move |graph, _config| {
        let scene = graph.create_scene();
        slot.set(Some(scene));
        Ok(scene)
    });
    e.preload(["a.txt"]);
    e.start().unwrap();
    assert_eq!(Some(e.current_scene()), made.get());
    e.block_on_assets().unwrap();
    assert_eq!(e.current_scene(), e.root_scene());
}

#[test]
fn test_start_without_preloads_fires_load_immediately() {
    let mut e = engine();
    let log: Log = Rc::default();
    log_engine(&mut e, EventType::Load, "load", &log);
    e.start().unwrap();
    e.start().unwrap();
    assert_eq!(*log.borrow(), ["load"]);
}

#[test]
fn test_runtime_load_reports_paths_and_skips_loaded() {
    let source = MemorySource::new()
        .with_file("a.txt", "a")
        .with_file("b.txt", "b")
        .with_file("c.txt", "c");
    let mut e = engine_with(EngineConfig::default(), source);
    e.start().unwrap();
    let progress: Rc<RefCell<Vec<(usize, usize, Option<String>)>>> = Rc::default();
    let sink = progress.clone();
    e.on(EventType::Progress, move |_, ev| {
        if let EventData::Progress { loaded, total, path, .. } = &ev.data {
            sink.borrow_mut().push((*loaded, *total, path.clone()));
        }
        Ok(())
    });

    let first = e.load_assets(["a.txt", "b.txt"], LoadOptions::default()).unwrap();
    e.block_on_assets().unwrap();
    assert!(first.is_ok());
    assert_eq!(first.status().loaded, 2);

    let second = e.load_assets(["a.txt", "c.txt"], LoadOptions::default()).unwrap();
    e.block_on_assets().unwrap();
    assert!(second.is_ok());
    assert_eq!(
        *progress.borrow(),
        [
            (1, 2, Some("a.txt".into())),
            (2, 2, Some("b.txt".into())),
            (1, 2, Some("a.txt".into())),
            (2, 2, Some("c.txt".into())),
        ]
    );

    let nothing = e.ensure_assets(["a.txt", "c.txt"], LoadOptions::default()).unwrap();
    assert!(nothing.is_ok());
    assert_eq!(nothing.status().total, 0);

    e.unload_assets(["a.txt"]);
    assert!(!e.has_asset("a.txt"));
    assert_eq!(e.assets().len(), 2);
}

#[test]
fn test_silent_runtime_load() {
    let mut e = engine_with(EngineConfig::default(), MemorySource::new().with_file("a.txt", "a"));
    let log: Log = Rc::default();
    log_engine(&mut e, EventType::Progress, "progress", &log);
    let handle = e
        .prefetch(["a.txt"], LoadOptions { emit_progress: false })
        .unwrap();
    e.block_on_assets().unwrap();
    assert!(handle.is_ok());
    assert!(log.borrow().is_empty());
}

#[test]
fn test_failed_load_dispatches_error() {
    let source = MemorySource::new().with_file("ok.txt", "fine");
    let mut e = engine_with(EngineConfig::default(), source);
    let messages: Log = Rc::default();
    let sink = messages.clone();
    e.on(EventType::Error, move |_, ev| {
        if let EventData::Failure { message } = &ev.data {
            sink.borrow_mut().push(message.clone());
        }
        Ok(())
    });

    let handle = e
        .load_assets(["ok.txt", "missing.png", "never.txt"], LoadOptions::default())
        .unwrap();
    e.block_on_assets().unwrap();

    assert!(handle.is_finished());
    assert!(!handle.is_ok());
    assert!(handle.error().is_some());
    assert_eq!(handle.status().loaded, 1);
    assert!(e.has_asset("ok.txt"));
    assert!(!e.has_asset("never.txt"));
    assert_eq!(messages.borrow().len(), 1);
    assert!(messages.borrow()[0].contains("missing.png"));
}

#[test]
fn test_engine_from_json_config() {
    let config = EngineConfig::from_json(r#"{ "width": 160, "height": 144, "fps": 60 }"#).unwrap();
    let e = engine_with(config, MemorySource::new());
    assert_eq!((e.width(), e.height(), e.scale()), (160.0, 144.0, 1.0));
    assert_eq!(e.fps(), 60);
    assert_eq!(e.surface().size(), (160.0, 144.0, 1.0));
}
