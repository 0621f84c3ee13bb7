// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Synthetic tile renderer.
//!
//! Casts one primary ray per pixel at a lit sphere over a checkered
//! floor. The image is cut into root tiles; each tile task either shades
//! its pixels or, while an edge exceeds the split size, enqueues its four
//! quarters from inside the running task.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{ensure, Context as _};
use strand_rt::{Scheduler, SchedulerStats};

#[derive(Debug, Clone)]
pub struct RenderOptions {
    pub width: u32,
    pub height: u32,
    /// Edge of the root tiles.
    pub tile: u32,
    /// Tiles with an edge above this are subdivided. 0 disables splitting.
    pub split: u32,
}

#[derive(Debug)]
pub struct RenderReport {
    pub elapsed: Duration,
    pub root_tiles: usize,
    pub shaded_tiles: usize,
    pub checksum: u64,
    pub stats: SchedulerStats,
}

/// Packed `0x00RRGGBB` pixels, written concurrently by tile tasks.
pub struct Image {
    width: u32,
    height: u32,
    pixels: Vec<AtomicU32>,
}

impl Image {
    pub fn new(width: u32, height: u32) -> Self {
        let len = width as usize * height as usize;
        Self {
            width,
            height,
            pixels: (0..len).map(|_| AtomicU32::new(0)).collect(),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn get(&self, x: u32, y: u32) -> u32 {
        self.pixels[self.index(x, y)].load(Ordering::Relaxed)
    }

    fn put(&self, x: u32, y: u32, rgb: u32) {
        self.pixels[self.index(x, y)].store(rgb, Ordering::Relaxed);
    }

    fn index(&self, x: u32, y: u32) -> usize {
        y as usize * self.width as usize + x as usize
    }

    /// FNV-1a over the pixels in row-major order.
    pub fn checksum(&self) -> u64 {
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for px in &self.pixels {
            for byte in px.load(Ordering::Relaxed).to_le_bytes() {
                hash ^= u64::from(byte);
                hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
            }
        }
        hash
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tile {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

impl Tile {
    pub fn area(&self) -> u64 {
        u64::from(self.w) * u64::from(self.h)
    }

    /// Up to four non-empty quarters covering exactly this tile.
    pub fn quarters(self) -> impl Iterator<Item = Tile> {
        let (lw, lh) = (self.w / 2, self.h / 2);
        [
            Tile { x: self.x, y: self.y, w: lw, h: lh },
            Tile { x: self.x + lw, y: self.y, w: self.w - lw, h: lh },
            Tile { x: self.x, y: self.y + lh, w: lw, h: self.h - lh },
            Tile { x: self.x + lw, y: self.y + lh, w: self.w - lw, h: self.h - lh },
        ]
        .into_iter()
        .filter(|t| t.w > 0 && t.h > 0)
    }
}

/// Cover a `width` x `height` image with tiles of edge `edge`, clipping
/// the last row and column.
pub fn tiles(width: u32, height: u32, edge: u32) -> Vec<Tile> {
    let mut out = Vec::new();
    for y in (0..height).step_by(edge as usize) {
        for x in (0..width).step_by(edge as usize) {
            out.push(Tile {
                x,
                y,
                w: edge.min(width - x),
                h: edge.min(height - y),
            });
        }
    }
    out
}

/// Start `sched`, render the whole image through it, stop it.
#[tracing::instrument(skip(sched))]
pub fn render(sched: &Scheduler, opts: &RenderOptions) -> anyhow::Result<(Arc<Image>, RenderReport)> {
    ensure!(opts.width > 0 && opts.height > 0, "image must be at least 1x1");
    ensure!(opts.tile > 0, "tile size must be positive");

    let image = Arc::new(Image::new(opts.width, opts.height));
    let shaded = Arc::new(AtomicUsize::new(0));
    let roots = tiles(opts.width, opts.height, opts.tile);

    let start = Instant::now();
    sched.begin().context("failed to start the scheduler")?;
    for &tile in &roots {
        enqueue_tile(sched, &image, tile, opts.split, &shaded);
    }
    sched.stop();
    let elapsed = start.elapsed();

    let report = RenderReport {
        elapsed,
        root_tiles: roots.len(),
        shaded_tiles: shaded.load(Ordering::Acquire),
        checksum: image.checksum(),
        stats: sched.stats(),
    };
    tracing::debug!(?report, "render finished");
    Ok((image, report))
}

fn enqueue_tile(
    sched: &Scheduler,
    image: &Arc<Image>,
    tile: Tile,
    split: u32,
    shaded: &Arc<AtomicUsize>,
) {
    let (s, img, count) = (sched.clone(), image.clone(), shaded.clone());
    sched.enqueue(move || {
        if split > 0 && (tile.w > split || tile.h > split) {
            for quarter in tile.quarters() {
                enqueue_tile(&s, &img, quarter, split, &count);
            }
        } else {
            shade_tile(&img, tile);
            count.fetch_add(1, Ordering::Relaxed);
        }
    });
}

fn shade_tile(image: &Image, tile: Tile) {
    for y in tile.y..tile.y + tile.h {
        for x in tile.x..tile.x + tile.w {
            image.put(x, y, shade(x, y, image.width(), image.height()));
        }
    }
}

type Vec3 = [f32; 3];

fn dot(a: Vec3, b: Vec3) -> f32 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

fn scale(a: Vec3, s: f32) -> Vec3 {
    [a[0] * s, a[1] * s, a[2] * s]
}

fn sub(a: Vec3, b: Vec3) -> Vec3 {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

fn normalize(a: Vec3) -> Vec3 {
    scale(a, 1.0 / dot(a, a).sqrt())
}

const SPHERE_CENTER: Vec3 = [0.0, 0.0, 4.0];
const FLOOR_Y: f32 = -1.0;

/// Colour of the primary ray through pixel (x, y). Camera at the origin
/// looking down +z.
fn shade(x: u32, y: u32, width: u32, height: u32) -> u32 {
    let aspect = width as f32 / height as f32;
    let u = ((x as f32 + 0.5) / width as f32 * 2.0 - 1.0) * aspect;
    let v = 1.0 - (y as f32 + 0.5) / height as f32 * 2.0;
    let dir = normalize([u, v, 1.5]);
    let light = normalize([-1.0, 1.0, -0.5]);

    let oc = sub([0.0; 3], SPHERE_CENTER);
    let b = dot(oc, dir);
    let disc = b * b - (dot(oc, oc) - 1.0);
    if disc > 0.0 {
        let t = -b - disc.sqrt();
        if t > 0.0 {
            let normal = normalize(sub(scale(dir, t), SPHERE_CENTER));
            let lambert = dot(normal, light).max(0.0);
            return pack(scale([0.9, 0.3, 0.2], 0.1 + 0.9 * lambert));
        }
    }

    if dir[1] < 0.0 {
        let t = FLOOR_Y / dir[1];
        let hit = scale(dir, t);
        let check = (hit[0].floor() as i64 + hit[2].floor() as i64) & 1 == 0;
        let base = if check { 0.8 } else { 0.25 };
        let fade = 1.0 / (1.0 + 0.02 * t * t);
        return pack([base * fade, base * fade, base * fade]);
    }

    let sky = 0.5 + 0.5 * dir[1];
    pack([1.0 - 0.5 * sky, 1.0 - 0.3 * sky, 1.0])
}

fn pack(rgb: Vec3) -> u32 {
    let channel = |c: f32| (c.clamp(0.0, 1.0) * 255.0 + 0.5) as u32;
    (channel(rgb[0]) << 16) | (channel(rgb[1]) << 8) | channel(rgb[2])
}
