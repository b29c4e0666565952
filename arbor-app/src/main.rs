use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use arbor::{
    BoundingBox, DetachPolicy, Layer, LayerId, NodeDesc, OverlapEvent, OverlapHandler,
    SceneCommands, Stage, Transform,
};
use glam::Vec3;

const PARTICLES: usize = 200;
const ARENA: f32 = 40.0;
const FRAMES: u64 = 240;
const DT: f32 = 1.0 / 60.0;

/// Contacts reported by particle handlers, consumed by the app after each frame.
type ContactLog = Arc<Mutex<Vec<(hecs::Entity, Vec3, f32)>>>;

/// Records each contact so the particle can be pushed out and bounced.
struct Bounce {
    contacts: ContactLog,
}

impl OverlapHandler for Bounce {
    fn receive_event(&mut self, event: &OverlapEvent, _commands: &mut SceneCommands) {
        if let Ok(mut contacts) = self.contacts.lock() {
            contacts.push((event.node, event.normal, event.penetration));
        }
    }
}

struct BounceDemo {
    layer: LayerId,
    velocities: HashMap<hecs::Entity, Vec3>,
    contacts: ContactLog,
    swallowed: Arc<Mutex<usize>>,
}

impl BounceDemo {
    fn new(layer: LayerId) -> Self {
        Self {
            layer,
            velocities: HashMap::new(),
            contacts: ContactLog::default(),
            swallowed: Arc::default(),
        }
    }

    fn init(&mut self, layer: &mut Layer) -> anyhow::Result<()> {
        // Walls
        let walls = layer.spawn_root(NodeDesc::group("walls"));
        let thickness = 2.0;
        for (name, position, extent) in [
            ("left", Vec3::new(-thickness, 0.0, 0.0), Vec3::new(thickness, ARENA, 1.0)),
            ("right", Vec3::new(ARENA, 0.0, 0.0), Vec3::new(thickness, ARENA, 1.0)),
            ("bottom", Vec3::new(0.0, -thickness, 0.0), Vec3::new(ARENA, thickness, 1.0)),
            ("top", Vec3::new(0.0, ARENA, 0.0), Vec3::new(ARENA, thickness, 1.0)),
        ] {
            let wall = NodeDesc::group(name).with_footprint(BoundingBox::new(position, extent));
            layer.spawn_child(walls, wall)?;
        }

        // Sink: destroys any particle that touches it
        let sink = layer.spawn_root(
            NodeDesc::group("sink")
                .with_position(Vec3::new(ARENA * 0.5, ARENA * 0.5, 0.0))
                .with_footprint(BoundingBox::from_center_half_extents(
                    Vec3::ZERO,
                    Vec3::new(2.0, 2.0, 0.5),
                )),
        );
        let swallowed = self.swallowed.clone();
        let swallow = move |event: &OverlapEvent, commands: &mut SceneCommands| {
            commands.destroy(event.other, DetachPolicy::Cascade);
            if let Ok(mut count) = swallowed.lock() {
                *count += 1;
            }
        };
        layer.set_handler(sink, swallow)?;

        // Particles
        let swarm = layer.spawn_root(NodeDesc::swarm("particles"));
        let mut seed = 0x9e37_79b9_u32;
        let mut next = move || {
            seed ^= seed << 13;
            seed ^= seed >> 17;
            seed ^= seed << 5;
            (seed as f32) / (u32::MAX as f32)
        };
        for i in 0..PARTICLES {
            let position = Vec3::new(next() * (ARENA - 1.0), next() * (ARENA - 1.0), 0.0);
            let desc = NodeDesc::group(format!("particle-{i}"))
                .with_position(position)
                .with_footprint(BoundingBox::new(Vec3::ZERO, Vec3::new(0.8, 0.8, 1.0)));
            let particle = layer.spawn_child(swarm, desc)?;
            layer.set_handler(
                particle,
                Bounce {
                    contacts: self.contacts.clone(),
                },
            )?;
            let velocity = Vec3::new(next() - 0.5, next() - 0.5, 0.0) * 20.0;
            self.velocities.insert(particle, velocity);
        }

        log::info!("spawned {} nodes", layer.len());
        Ok(())
    }

    fn update(&mut self, layer: &mut Layer) -> anyhow::Result<()> {
        // Apply last frame's contacts: push out and reflect along the normal.
        let contacts = match self.contacts.lock() {
            Ok(mut contacts) => std::mem::take(&mut *contacts),
            Err(_) => anyhow::bail!("contact log poisoned"),
        };
        for (node, normal, penetration) in contacts {
            let (Some(velocity), Some(transform)) =
                (self.velocities.get_mut(&node), layer.transform(node))
            else {
                continue;
            };
            if velocity.dot(normal) > 0.0 {
                *velocity -= 2.0 * velocity.dot(normal) * normal;
            }
            let pushed = Transform {
                position: transform.position - normal * penetration * 0.5,
                ..transform
            };
            layer.set_transform(node, pushed)?;
        }

        // Integrate
        self.velocities.retain(|node, _| layer.is_alive(*node));
        for (&node, velocity) in &self.velocities {
            if let Some(transform) = layer.transform(node) {
                let moved = Transform {
                    position: transform.position + *velocity * DT,
                    ..transform
                };
                layer.set_transform(node, moved)?;
            }
        }
        Ok(())
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let mut stage = Stage::default();
    let id = stage.add_layer("arena");
    let mut demo = BounceDemo::new(id);
    demo.init(stage.layer_mut(id).context("arena layer missing")?)?;

    for _ in 0..FRAMES {
        let layer = stage.layer_mut(demo.layer).context("arena layer missing")?;
        demo.update(layer)?;
        for (_, stats) in stage.tick() {
            if stats.frame % 60 == 0 {
                log::info!(
                    "frame {}: {} manifolds, {} events, {} commands",
                    stats.frame,
                    stats.manifolds,
                    stats.resolve.dispatched,
                    stats.commands_applied
                );
            }
        }
    }

    let swallowed = demo.swallowed.lock().map(|c| *c).unwrap_or_default();
    log::info!(
        "done: {} particles left, {} swallowed",
        demo.velocities.len(),
        swallowed
    );
    Ok(())
}
