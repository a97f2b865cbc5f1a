// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

mod config;

use anyhow::{Context, Result};
use ash::vk;
use clap::{Parser, Subcommand};
use log::info;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use nvcs_cmd::decoder;
use nvcs_cmd::heap::words_to_bytes;
use nvcs_cmd::pipeline::{CbufSource, GraphicsPipeline, StageCbufs};
use nvcs_cmd::rendering::{ImageView, RenderingAttachment, RenderingInfo};
use nvcs_cmd::replay::{DrawKind, Replay};
use nvcs_cmd::{CommandBuffer, Device, GpuHeap, HostArena};
use nvcs_common::fields::TargetLayout;
use nvcs_common::settings::{DebugFlags, Settings};
use nvcs_common::types::{BufferRef, ClassGen, ShaderStage, WHOLE_SIZE};
use nvcs_mme::{isa, MmeProgram};

/// nvcs - 3D class command stream tool
#[derive(Parser, Debug)]
#[command(name = "nvcs", version, about = "Inspect and generate 3D class push streams")]
struct Args {
    /// Path to config file (default: $XDG_CONFIG_HOME/nvcs/nvcs.ini)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Hardware generation, overriding the config (e.g. pascal, turing)
    #[arg(short, long)]
    generation: Option<String>,

    /// Comma-separated debug flags added to the config's
    #[arg(short, long)]
    debug: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Decode a raw push stream (little-endian words) into method writes
    Dump { file: PathBuf },
    /// List the microprogram image, or disassemble one program
    Mme { program: Option<String> },
    /// Record a sample command buffer and replay it
    Demo {
        /// Number of instanced draws to record
        #[arg(long, default_value_t = 2)]
        draws: u32,
        /// Also record an indirect draw over this many records
        #[arg(long)]
        indirect: Option<u32>,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp_millis()
        .init();

    let mut settings = config::load_config(args.config.as_ref());
    if let Some(gen) = &args.generation {
        settings.generation = ClassGen::from_str_or_default(gen);
    }
    if let Some(flags) = &args.debug {
        settings.debug_flags |= DebugFlags::from_str_or_default(flags);
    }

    match args.command {
        Command::Dump { file } => dump(&file),
        Command::Mme { program } => mme(settings, program.as_deref()),
        Command::Demo { draws, indirect } => demo(settings, draws, indirect),
    }
}

fn dump(file: &Path) -> Result<()> {
    let words = config::read_words(file)
        .with_context(|| format!("Failed to read push stream: {}", file.display()))?;
    info!("{}: {} words", file.display(), words.len());
    println!("{}", decoder::dump(&words));
    Ok(())
}

fn mme(settings: Settings, program: Option<&str>) -> Result<()> {
    let gen = settings.generation;
    let device = Device::from_settings(settings).context("Failed to build microprogram image")?;
    let image = device.image();

    let Some(name) = program else {
        println!("{:?}: {} words", gen, image.code().len());
        for p in MmeProgram::ALL {
            println!(
                "  {:2} {:<28} start {:4} {:4} words",
                p.id(),
                p.name(),
                image.start(p),
                image.program_code(p).len()
            );
        }
        return Ok(());
    };

    let p = MmeProgram::ALL
        .into_iter()
        .find(|p| p.name().eq_ignore_ascii_case(name))
        .with_context(|| format!("Unknown program: {}", name))?;
    println!("{} ({:?}):", p.name(), gen);
    println!("{}", isa::disassemble(image.program_code(p)));
    Ok(())
}

fn demo(settings: Settings, draws: u32, indirect: Option<u32>) -> Result<()> {
    let device = Device::from_settings(settings).context("Failed to build microprogram image")?;
    let mut cmd = CommandBuffer::new(Arc::clone(&device), HostArena::default());

    let target = ImageView {
        addr: 0x2_0000_0000,
        width: 256,
        height: 256,
        layers: 1,
        array_pitch: 0,
        hw_format: 0xD5,
        layout: TargetLayout::BlockLinear {
            height_log2: 4,
            depth_log2: 0,
        },
    };
    let area = vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent: vk::Extent2D {
            width: 256,
            height: 256,
        },
    };
    let uniforms = BufferRef::new(0x3_0000_0000, 0x400);
    let vertices = BufferRef::new(0x4_0000_0000, 0x1000);
    let pipeline = Arc::new(GraphicsPipeline {
        cbufs: vec![
            StageCbufs {
                stage: ShaderStage::Vertex,
                slots: vec![CbufSource::Root],
            },
            StageCbufs {
                stage: ShaderStage::Fragment,
                slots: vec![
                    CbufSource::Root,
                    CbufSource::Range(uniforms.addr_range(0x100, 0x100)),
                ],
            },
        ],
        write_masks: 0xF,
        ..GraphicsPipeline::default()
    });

    cmd.begin();
    cmd.init_context();
    cmd.begin_rendering(&RenderingInfo {
        area,
        layer_count: 1,
        view_mask: 0,
        samples: 1,
        color: vec![RenderingAttachment::new(vk::Format::R8G8B8A8_UNORM, target)],
        depth: None,
        stencil: None,
    });
    cmd.bind_pipeline(pipeline);
    cmd.bind_vertex_buffer(0, vertices.addr_range(0, WHOLE_SIZE));
    cmd.dynamic_state_mut().set_viewports(
        0,
        &[vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: 256.0,
            height: 256.0,
            min_depth: 0.0,
            max_depth: 1.0,
        }],
    );
    cmd.dynamic_state_mut().set_scissors(0, &[area]);
    cmd.draw(3, 1, 0, 0);
    for i in 0..draws {
        cmd.draw(3, 2, 3 * i, i);
    }

    if let Some(count) = indirect {
        let records: Vec<u32> = (0..count).flat_map(|i| [3, 1, 3 * i, 0]).collect();
        let addr = cmd
            .heap_mut()
            .upload(&words_to_bytes(&records), 4)
            .context("Failed to upload indirect records")?;
        cmd.draw_indirect(addr, count, 16);
    }
    cmd.end_rendering();
    cmd.end().context("Recording failed")?;

    for seg in cmd.segments() {
        println!(
            "segment 0x{:X} +{} words{}",
            seg.addr,
            seg.len,
            if seg.no_prefetch { " (indirect)" } else { "" }
        );
    }
    println!("{} bytes requested", cmd.unflushed_bytes());

    let mut replay = Replay::with_image(device.image());
    cmd.replay_into(&mut replay)
        .context("Failed to replay the recorded stream")?;
    report(&replay);
    Ok(())
}

fn report(replay: &Replay) {
    let count = |kind: DrawKind| replay.draws().iter().filter(|d| d.kind == kind).count();
    println!(
        "{} writes, {} macro calls, draws: {} array, {} indexed, {} auto{}",
        replay.writes().len(),
        replay.calls().len(),
        count(DrawKind::Array),
        count(DrawKind::Indexed),
        count(DrawKind::Auto),
        if replay.hung() { " (macro hung)" } else { "" }
    );
}
