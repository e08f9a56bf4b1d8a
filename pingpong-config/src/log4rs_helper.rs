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

#[doc(hidden)]
pub fn get_log4rs_config(verbose: bool) -> anyhow::Result<log4rs::Config> {
    use log4rs::{append, config, encode};

    let stdout = append::console::ConsoleAppender::builder()
        .encoder(Box::new(encode::pattern::PatternEncoder::new(
            "{d(%Y-%m-%d %H:%M:%S)} {h({l:<5})} {t} $ {m}{n}",
        )))
        .build();

    // verbose mode exposes the full SMTP protocol trace, which may contain
    // message content
    let root_level = if verbose {
        log::LevelFilter::Trace
    } else {
        log::LevelFilter::Info
    };

    config::Config::builder()
        .appender(config::Appender::builder().build("stdout", Box::new(stdout)))
        .build(config::Root::builder().appender("stdout").build(root_level))
        .map_err(|e| {
            e.errors().iter().for_each(|e| log::error!("{}", e));
            anyhow::anyhow!(e)
        })
}

#[cfg(test)]
mod tests {
    use super::get_log4rs_config;

    #[test]
    fn init() {
        let res = get_log4rs_config(false);
        assert!(res.is_ok(), "{:?}", res);
        let res = get_log4rs_config(true);
        assert!(res.is_ok(), "{:?}", res);
    }
}
