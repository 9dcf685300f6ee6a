//! Moves a camera's zoom to a position, then asks the camera where it ended up.
use clap::Parser;
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::EnvFilter;
use visca::{
    protocol::{unpack_nibbles, Address, Command, Inquiry, LimitsTable, Param},
    DispatcherConfig, Result, ViscaController,
};

/// Sets the zoom position of a VISCA camera.
///
/// This connects to a VISCA-over-IP camera or a TCP serial bridge, sends
/// CAM_Zoom Direct, and then reads back CAM_ZoomPosInq.
#[derive(Debug, Parser)]
#[clap(verbatim_doc_comment)]
struct CliParser {
    /// Address and port of the camera or serial bridge.
    #[clap(short, long)]
    pub addr: String,

    /// Camera address on the link (1 - 7).
    #[clap(short, long, default_value = "1")]
    pub camera: u8,

    /// Zoom position, from 0 (wide) to 16384 (tele).
    #[clap(short, long)]
    pub position: i32,
}

#[tokio::main]
async fn main() -> Result {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .compact()
        .init();

    let opts = CliParser::parse();
    let address = Address::camera(opts.camera)?;
    let limits = LimitsTable::builtin().get("ZoomPosition")?;
    let controller = ViscaController::connect_tcp(&opts.addr, DispatcherConfig::default()).await?;

    let mut zoom = Command::with_bytes(address, &[0x04, 0x47])?;
    let position = zoom.push_param(Param::word(0, limits)?)?;
    zoom.set(position, opts.position)?;
    let r = controller.send(zoom).await?;
    info!("zoom finished on socket {}", r.socket);

    let inq = Inquiry::new(address, &[0x04, 0x47], unpack_nibbles, |v| {
        info!("zoom position: {v:#06x}");
    })?;
    controller.send(inq).await?;

    Ok(())
}
