// Headless bounce: a ball falls onto a tile floor, bounces off the walls and stops after a few seconds.

use std::cell::Cell;
use std::rc::Rc;

use anyhow::Result;
use log::info;
use stagecraft::{
    Easing, Engine, EngineConfig, EventType, HeadlessSurface, LayerOptions, TileQuery, ThreadClock, Vec2,
};

const TILE: u32 = 16;
const BALL: f32 = 12.0;
const GRAVITY: f32 = 0.4;
const RUN_FRAMES: u64 = 240;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = EngineConfig::default().with_fps(60);
    let mut engine = Engine::new(config, HeadlessSurface::new())?;
    let (width, height) = (engine.width(), engine.height());

    let cols = (width as u32 / TILE) as usize;
    let rows = (height as u32 / TILE) as usize;
    let mut floor = vec![vec![0; cols]; rows];
    floor[rows - 1] = vec![1; cols];

    let graph = engine.graph_mut();
    let map = graph.create_tilemap(TILE, TILE, cols, rows);
    graph.edit_tilemap(map, |tiles| {
        tiles.add_layer("floor", LayerOptions::default().with_data(floor).collidable())
    });

    let ball = graph.create_entity(BALL, BALL);
    graph.spatial_mut(ball)?.move_to(40.0, 20.0);
    graph
        .tl(ball)?
        .scale_to(1.2, 0.8, 6, Easing::EaseOutQuad)
        .scale_to(1.0, 1.0, 6, Easing::EaseInQuad)
        .loop_forever();

    let velocity = Rc::new(Cell::new(Vec2::new(2.5, 0.0)));
    let bounces = Rc::new(Cell::new(0u32));
    {
        let (velocity, bounces) = (velocity.clone(), bounces.clone());
        graph.on(ball, EventType::EnterFrame, move |graph, _| {
            let mut v = velocity.get();
            v.y += GRAVITY;
            graph.spatial_mut(ball)?.move_by(v.x, v.y);

            if graph.intersect_tiles(map, ball, &TileQuery::new()).hit {
                graph.spatial_mut(ball)?.move_by(0.0, -v.y);
                v.y = -v.y * 0.8;
                bounces.set(bounces.get() + 1);
            }
            let x = graph.spatial(ball)?.x();
            if x < 0.0 || x + BALL > width {
                graph.spatial_mut(ball)?.move_by(-v.x, 0.0);
                v.x = -v.x;
            }
            velocity.set(v);
            Ok(())
        })?;
    }

    let root = engine.root_scene();
    engine.graph_mut().add_child(root, map)?;
    engine.graph_mut().add_child(root, ball)?;

    engine.on(EventType::Load, |_, _| {
        info!("bounce demo loaded");
        Ok(())
    });
    engine.on(EventType::ExitFrame, |engine, _| {
        if engine.frame() + 1 >= RUN_FRAMES {
            engine.stop();
        }
        Ok(())
    });

    engine.run(&mut ThreadClock::new())?;

    let end = engine.graph().world_position(ball);
    info!(
        "stopped after {} frames at ({:.1}, {:.1}) with {} bounces",
        engine.frame(),
        end.x,
        end.y,
        bounces.get()
    );
    Ok(())
}
