//! Library side of the deskctrl firmware: the button scan task and the
//! MQTT transport glue. The embassy bring-up and the session task live in
//! `src/bin/main.rs`.

#![no_std]

pub mod buttons;
pub mod mqtt;
