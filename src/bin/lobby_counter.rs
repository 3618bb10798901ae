/// 大堂人数统计服务
/// Lobby people counter: camera → detection → tracking → count events + MJPEG feed
///
/// 主程序入口 - 直接运行: cargo run --bin lobby-counter --release
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use mimalloc::MiMalloc;
use tracing_subscriber::EnvFilter;

use lobby_counter::detection::{Detector, ReplayDetector};
use lobby_counter::input::{FrameSource, ImageSequenceSource, SourceFactory};
use lobby_counter::presence::PresenceAggregator;
use lobby_counter::renderer::FrameAnnotator;
use lobby_counter::server::{create_router, AppState};
use lobby_counter::storage::{BoundedAppender, EventSink, MemoryEventSink, SqliteEventSink};
use lobby_counter::{Args, FrameHub, FramePipeline};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// 每个订阅者可积压的分片数
const STREAM_CAPACITY: usize = 4;

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = match &args.log {
        Some(directives) => EnvFilter::try_new(directives)
            .with_context(|| format!("invalid log filter {:?}", directives))?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!("Starting lobby-counter v{}", env!("CARGO_PKG_VERSION"));

    let config = args.pipeline_config();
    config.validate().context("invalid configuration")?;

    // ========== 事件存储 ==========
    let store: Arc<dyn EventSink> = if args.database == ":memory:" {
        Arc::new(MemoryEventSink::new())
    } else {
        Arc::new(
            SqliteEventSink::open(&args.database, args.event_timeout())
                .with_context(|| format!("open database {}", args.database))?,
        )
    };
    let seed = store
        .latest()
        .context("read latest count event")?
        .map(|e| e.event.lobby_count)
        .unwrap_or(0);
    let sink: Arc<dyn EventSink> = Arc::new(BoundedAppender::new(store, args.event_timeout())?);
    tracing::info!(database = %args.database, lobby_count = seed, "event log ready");

    // ========== 检测器与流水线 ==========
    let detector = build_detector(&args)?;

    let annotator = match &args.font {
        Some(font) => FrameAnnotator::new(config.line_position)
            .with_font_file(font)
            .with_context(|| format!("load font {}", font.display()))?,
        None => FrameAnnotator::new(config.line_position).with_default_font(),
    };

    let presence = PresenceAggregator::with_initial(sink.clone(), seed);
    let pipeline = FramePipeline::new(config, detector, presence, annotator)?;

    // 启动时打开一次视频源, 不可用时直接退出
    let hub = FrameHub::open(pipeline, source_factory(&args), STREAM_CAPACITY)
        .context("open frame source")?;

    // ========== HTTP 服务 ==========
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("build tokio runtime")?;

    let app = create_router(AppState { hub, sink });
    runtime.block_on(async move {
        let listener = tokio::net::TcpListener::bind(&args.bind)
            .await
            .with_context(|| format!("bind {}", args.bind))?;
        tracing::info!("Listening on {}", args.bind);

        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = tokio::signal::ctrl_c().await;
                tracing::info!("shutdown requested");
            })
            .await?;
        Ok::<(), anyhow::Error>(())
    })
}

fn build_detector(args: &Args) -> anyhow::Result<Box<dyn Detector>> {
    if let Some(path) = &args.detections {
        let replay = ReplayDetector::open(path)
            .with_context(|| format!("open detections file {}", path.display()))?;
        return Ok(Box::new(replay));
    }

    #[cfg(feature = "onnx")]
    {
        let yolo = lobby_counter::detection::YoloV8Detector::new(&args.model)
            .with_context(|| format!("load model {}", args.model))?;
        Ok(Box::new(yolo))
    }

    #[cfg(not(feature = "onnx"))]
    {
        anyhow::bail!(
            "no detector available for model {}: build with `--features onnx` or pass --detections",
            args.model
        )
    }
}

fn source_factory(args: &Args) -> SourceFactory {
    let settings = args.source_settings();

    if let Some(dir) = args.frames_dir.clone() {
        return Box::new(move || {
            Ok(Box::new(ImageSequenceSource::open(&dir, settings)?) as Box<dyn FrameSource>)
        });
    }

    let index = args.camera_index;
    #[cfg(feature = "ffmpeg")]
    {
        Box::new(move || {
            let camera = lobby_counter::input::CameraSource::open(index, settings)?;
            Ok(Box::new(camera) as Box<dyn FrameSource>)
        })
    }

    #[cfg(not(feature = "ffmpeg"))]
    {
        Box::new(move || {
            Err(lobby_counter::Error::SourceUnavailable(format!(
                "camera {} requires the `ffmpeg` feature; pass --frames-dir instead",
                index
            )))
        })
    }
}
