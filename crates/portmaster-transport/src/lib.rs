// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// PortMaster Transport: one contract, one state machine, five media.
//
// `Transport` is the object-safe contract callers hold as
// `Box<dyn Transport>`.  `PortTransport<M>` implements it once over any
// `Medium`; serial lines, parallel ports, network printers (RAW, LPR, IPP),
// USB printers and an in-process loopback plug in as media.
// `TransportFactory` creates them by type identifier.

pub mod device;
pub mod factory;
pub mod framing;
mod ipp;
pub mod loopback;
mod lpr;
pub mod network;
pub mod port;
pub mod serial;
pub mod traits;

pub use device::{ParallelMedium, ParallelTransport, UsbPrintMedium, UsbPrintTransport};
pub use factory::TransportFactory;
pub use framing::Framing;
pub use loopback::{LoopbackMedium, LoopbackTransport};
pub use network::{NetworkPrintMedium, NetworkPrintTransport};
pub use port::{Attachment, Medium, PortTransport};
pub use serial::{SerialMedium, SerialTransport};
pub use traits::{DataSink, Transport};
