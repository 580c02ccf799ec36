//! The `smtp` filter strategy (§4.5): instead of running a local filter
//! command, relay the cached message to a downstream SMTP host and let its
//! verdict decide the outcome.
//!
//! Grounded on the original's `process_smtp_command` / `smtp_command` pair,
//! which issues one `recv()` per command and trusts it to contain the whole
//! reply. This reads CRLF-terminated lines through a `BufReader` instead (so
//! a reply arriving in more than one TCP segment is still assembled
//! correctly), but accumulates every continuation line of a multi-line
//! reply (`"250-..."`) until the terminal line (`"250 ..."`) before treating
//! the reply as complete, so the original's "whole reply at once" guarantee
//! still holds.

use crate::process::FilterOutcome;
use crate::{Error, MessageContext};
use std::io::{BufRead, BufReader, Write};
use std::net::{Ipv4Addr, TcpStream};
use std::time::Duration;

pub fn run_smtp_filter(
    ctx: &mut dyn MessageContext,
    relay_host: &str,
    header: Option<&str>,
    timeout: Duration,
) -> Result<FilterOutcome, Error> {
    ctx.cache_data()?;

    let sender = ctx.sender().ok_or(Error::MissingEnvelope)?.to_string();
    let recipients = ctx.recipients().ok_or(Error::MissingEnvelope)?.to_string();
    let helo = ctx.helo().map(str::to_string);
    let peer_name = ctx.peer_name().to_string();

    let addr: Ipv4Addr = relay_host
        .parse()
        .map_err(|_| Error::UnexpectedReply(format!("invalid relay address: {relay_host}")))?;

    let stream = TcpStream::connect((addr, 25))?;
    stream.set_read_timeout(Some(timeout))?;
    stream.set_write_timeout(Some(timeout))?;
    let mut writer = stream.try_clone()?;
    let mut reader = BufReader::new(stream);

    expect(&read_reply(&mut reader)?, "220")?;

    send(&mut writer, "EHLO proxsmtp\r\n")?;
    expect(&read_reply(&mut reader)?, "250")?;

    let xclient = match &helo {
        Some(helo) => format!(
            "XCLIENT ADDR={}{} HELO={}\r\n",
            ipv6_prefix(&peer_name),
            peer_name,
            helo
        ),
        None => format!("XCLIENT ADDR={}{}\r\n", ipv6_prefix(&peer_name), peer_name),
    };
    send(&mut writer, &xclient)?;
    expect(&read_reply(&mut reader)?, "220")?;

    send(&mut writer, &format!("MAIL FROM: {sender}\r\n"))?;
    expect(&read_reply(&mut reader)?, "250")?;

    for recipient in recipients.split('\n') {
        send(&mut writer, &format!("RCPT TO: {recipient}\r\n"))?;
        let reply = read_reply(&mut reader)?;
        if !reply.starts_with("250") {
            // The downstream host itself rejected this recipient: stop
            // here, same as the original, without sending the rest.
            return Ok(FilterOutcome::Rejected(reply.trim_end().to_string()));
        }
    }

    send(&mut writer, "DATA\r\n")?;
    expect(&read_reply(&mut reader)?, "354")?;

    let mut buf = [0u8; 4096];
    loop {
        let n = ctx.read_data(&mut buf)?;
        if n == 0 {
            break;
        }
        writer.write_all(&buf[..n])?;
    }

    send(&mut writer, "\r\n.\r\n")?;
    let final_reply = read_reply(&mut reader)?;
    let _ = send(&mut writer, "QUIT\r\n");

    let trimmed = final_reply.trim_end().to_string();
    if trimmed.starts_with("250") {
        ctx.done_data(header)?;
        Ok(FilterOutcome::Filtered)
    } else {
        Ok(FilterOutcome::Rejected(trimmed))
    }
}

fn ipv6_prefix(peer_name: &str) -> &'static str {
    if peer_name.contains(':') {
        "IPv6:"
    } else {
        ""
    }
}

fn send(writer: &mut impl Write, command: &str) -> Result<(), Error> {
    writer.write_all(command.as_bytes())?;
    Ok(())
}

/// Reads one full (possibly multi-line) SMTP reply: lines whose 4th byte is
/// `-` are continuations (`"250-PIPELINING\r\n"`); the reply ends at the
/// first line whose 4th byte is anything else (normally a space). Returns
/// the complete text, every line included, so multi-line codes survive
/// intact for logging and for pass-through to the originating client.
fn read_reply(reader: &mut impl BufRead) -> Result<String, Error> {
    let mut full = String::new();
    loop {
        let mut line = String::new();
        let n = reader.read_line(&mut line)?;
        if n == 0 {
            return Err(Error::UnexpectedReply("connection closed".to_string()));
        }
        let continues = line.as_bytes().get(3) == Some(&b'-');
        full.push_str(&line);
        if !continues {
            break;
        }
    }
    Ok(full)
}

fn expect(line: &str, code: &str) -> Result<(), Error> {
    if line.starts_with(code) {
        Ok(())
    } else {
        Err(Error::UnexpectedReply(line.trim_end().to_string()))
    }
}
