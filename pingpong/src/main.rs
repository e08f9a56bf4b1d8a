/*
 * pingpong-mail SMTP autoresponder
 * Copyright (C) 2023 the pingpong-mail developers
 *
 * This program is free software: you can redistribute it and/or modify it under
 * the terms of the GNU General Public License as published by the Free Software
 * Foundation, either version 3 of the License, or any later version.
 *
 * This program is distributed in the hope that it will be useful, but WITHOUT
 * ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
 * FOR A PARTICULAR PURPOSE.  See the GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License along with
 * this program. If not, see https://www.gnu.org/licenses/.
 *
*/
use anyhow::Context;
use pingpong_config::{build_dns, get_log4rs_config, Config};
use pingpong_server::{PingPongHandler, Server};

mod args;
use args::Args;

fn socket_bind_anyhow<A: std::net::ToSocketAddrs + std::fmt::Debug>(
    addr: A,
) -> anyhow::Result<std::net::TcpListener> {
    let socket = std::net::TcpListener::bind(&addr)
        .with_context(|| format!("Failed to bind socket on addr: '{addr:?}'"))?;

    socket
        .set_nonblocking(true)
        .with_context(|| format!("Failed to set non-blocking socket on addr: '{addr:?}'"))?;

    Ok(socket)
}

fn main() {
    if let Err(err) = try_main() {
        eprintln!("ERROR: {err}");
        log::error!("ERROR: {err}");
        err.chain().skip(1).for_each(|cause| {
            eprintln!("because: {cause}");
            log::error!("because: {cause}");
        });
        std::process::exit(1);
    }
}

fn try_main() -> anyhow::Result<()> {
    let args = <Args as clap::Parser>::parse();

    let config = std::fs::read_to_string(&args.config)
        .context(format!("Cannot read file '{}'", args.config))
        .and_then(|input| Config::from_yaml(&input).context("File contains format error"))
        .context("Cannot parse the configuration")?;
    let config = std::sync::Arc::new(config);

    get_log4rs_config(args.verbose)
        .map(log4rs::init_config)
        .context("Cannot initialize logs")??;

    let socket = socket_bind_anyhow((config.bind_host.as_str(), config.bind_port))?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        let dns = build_dns().context("Cannot build the dns resolver")?;
        let handler = std::sync::Arc::new(PingPongHandler::new(config.clone(), dns));

        let server = Server::new(config, socket, handler)?;
        log::info!("Starting server on: {}", server.addr()?);

        server.listen_and_serve().await.map_err(|e| {
            log::error!("pingpong-mail terminating error: '{e}'");
            e
        })
    })
}
