use structopt::StructOpt;

use decree::{Config, Role};

#[derive(StructOpt)]
#[structopt(name = "decree", about = "Replicated total-order log built on multi-decree Paxos")]
struct Opt {
    /// Path to the cluster configuration file
    #[structopt(parse(from_os_str))]
    config: std::path::PathBuf,

    /// Role to run: acceptor, proposer, learner, or client
    role: Role,

    /// Instance id within the role
    id: u64,
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let opt = Opt::from_args();

    let config = match Config::load(&opt.config) {
    | Ok(config) => config,
    | Err(error) => {
        eprintln!("{}", error);
        std::process::exit(1);
    }
    };

    if let Err(error) = decree::role::run(config, opt.role, opt.id).await {
        eprintln!("{}", error);
        std::process::exit(1);
    }
}
