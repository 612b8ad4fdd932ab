// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("unknown interface {0}")]
    UnknownInterface(String),

    #[error("interface {0} already running")]
    InterfaceExists(String),

    #[error("interface {0} did not acknowledge stop")]
    StopTimeout(String),

    #[error("interface {0} state machine is gone")]
    Shutdown(String),

    #[error("hello transmit: {0}")]
    Transmit(String),
}
