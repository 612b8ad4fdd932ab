// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

macro_rules! session_log {
    ($self:expr, $level:ident, $msg:expr; $($key:expr => $value:expr),*) => {
        slog::$level!($self.log,
            $msg;
            "component" => crate::COMPONENT_BFD,
            "module" => crate::MOD_SESSION,
            "unit" => UNIT_SESSION,
            "discriminator" => $self.id,
            "peer" => format_args!("{}", $self.peer),
            $($key => $value),*
        )
    };
    ($self:expr, $level:ident, $msg:expr, $($args:expr),*; $($key:expr => $value:expr),*) => {
        slog::$level!($self.log,
            $msg, $($args),*;
            "component" => crate::COMPONENT_BFD,
            "module" => crate::MOD_SESSION,
            "unit" => UNIT_SESSION,
            "discriminator" => $self.id,
            "peer" => format_args!("{}", $self.peer),
            $($key => $value),*
        )
    };
    ($self:expr, $level:ident, $msg:expr) => {
        slog::$level!($self.log,
            $msg;
            "component" => crate::COMPONENT_BFD,
            "module" => crate::MOD_SESSION,
            "unit" => UNIT_SESSION,
            "discriminator" => $self.id,
            "peer" => format_args!("{}", $self.peer),
        )
    };
    ($self:expr, $level:ident, $msg:expr, $($args:expr),*) => {
        slog::$level!($self.log,
            $msg, $($args),*;
            "component" => crate::COMPONENT_BFD,
            "module" => crate::MOD_SESSION,
            "unit" => UNIT_SESSION,
            "discriminator" => $self.id,
            "peer" => format_args!("{}", $self.peer),
        )
    };
}

macro_rules! dir_log {
    ($log:expr, $level:ident, $msg:expr; $($key:expr => $value:expr),*) => {
        slog::$level!($log,
            $msg;
            "component" => crate::COMPONENT_BFD,
            "module" => crate::MOD_DIRECTORY,
            "unit" => UNIT_DIRECTORY,
            $($key => $value),*
        )
    };
    ($log:expr, $level:ident, $msg:expr, $($args:expr),*; $($key:expr => $value:expr),*) => {
        slog::$level!($log,
            $msg, $($args),*;
            "component" => crate::COMPONENT_BFD,
            "module" => crate::MOD_DIRECTORY,
            "unit" => UNIT_DIRECTORY,
            $($key => $value),*
        )
    };
    ($log:expr, $level:ident, $msg:expr) => {
        slog::$level!($log,
            $msg;
            "component" => crate::COMPONENT_BFD,
            "module" => crate::MOD_DIRECTORY,
            "unit" => UNIT_DIRECTORY,
        )
    };
    ($log:expr, $level:ident, $msg:expr, $($args:expr),*) => {
        slog::$level!($log,
            $msg, $($args),*;
            "component" => crate::COMPONENT_BFD,
            "module" => crate::MOD_DIRECTORY,
            "unit" => UNIT_DIRECTORY,
        )
    };
}

pub(crate) use {dir_log, session_log};
