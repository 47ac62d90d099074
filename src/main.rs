use argh::FromArgs;
use crossbeam_channel as chan;

use mockwire::logger;
use mockwire::peer::{self, Echo, PeerSpec};

#[derive(FromArgs)]
/// A mock network peer.
pub struct Options {
    #[argh(option)]
    /// accept connections on the given address, as `name=address`
    pub listen: Vec<PeerSpec>,

    #[argh(option)]
    /// connect to the given peer, as `name=address`
    pub connect: Vec<PeerSpec>,

    #[argh(switch)]
    /// send every message received back to its sender (default: false)
    pub echo: bool,

    #[argh(option, default = "log::LevelFilter::Info")]
    /// log level (default: info)
    pub log: log::LevelFilter,
}

impl Options {
    pub fn from_env() -> Self {
        argh::from_env()
    }
}

fn main() {
    let opts = Options::from_env();

    if let Some(level) = opts.log.to_level() {
        logger::init(level).expect("initializing logger for the first time");
    }
    // Keep the sender alive, so that the peer runs until it is killed.
    let (_shutdown, shutdown_recv) = chan::bounded(1);
    let hooks = Echo {
        echo: opts.echo,
        ..Echo::default()
    };

    if let Err(err) = peer::run(&opts.listen, &opts.connect, hooks, shutdown_recv) {
        log::error!("{}", err);
        std::process::exit(1);
    }
}
