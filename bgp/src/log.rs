// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

macro_rules! fsm_log {
    ($self:expr, $level:ident, $msg:expr; $($key:expr => $value:expr),*) => {
        slog::$level!($self.log,
            $msg;
            "component" => crate::COMPONENT_BGP,
            "module" => crate::MOD_FSM,
            "unit" => UNIT_FSM,
            "fsm" => $self.id,
            "peer" => format_args!("{}", $self.peer),
            $($key => $value),*
        )
    };
    ($self:expr, $level:ident, $msg:expr, $($args:expr),*; $($key:expr => $value:expr),*) => {
        slog::$level!($self.log,
            $msg, $($args),*;
            "component" => crate::COMPONENT_BGP,
            "module" => crate::MOD_FSM,
            "unit" => UNIT_FSM,
            "fsm" => $self.id,
            "peer" => format_args!("{}", $self.peer),
            $($key => $value),*
        )
    };
    ($self:expr, $level:ident, $msg:expr) => {
        slog::$level!($self.log,
            $msg;
            "component" => crate::COMPONENT_BGP,
            "module" => crate::MOD_FSM,
            "unit" => UNIT_FSM,
            "fsm" => $self.id,
            "peer" => format_args!("{}", $self.peer),
        )
    };
    ($self:expr, $level:ident, $msg:expr, $($args:expr),*) => {
        slog::$level!($self.log,
            $msg, $($args),*;
            "component" => crate::COMPONENT_BGP,
            "module" => crate::MOD_FSM,
            "unit" => UNIT_FSM,
            "fsm" => $self.id,
            "peer" => format_args!("{}", $self.peer),
        )
    };
}

macro_rules! manager_log {
    ($self:expr, $level:ident, $msg:expr; $($key:expr => $value:expr),*) => {
        slog::$level!($self.log,
            $msg;
            "component" => crate::COMPONENT_BGP,
            "module" => crate::MOD_MANAGER,
            "unit" => UNIT_MANAGER,
            "peer" => format_args!("{}", $self.peer),
            $($key => $value),*
        )
    };
    ($self:expr, $level:ident, $msg:expr, $($args:expr),*; $($key:expr => $value:expr),*) => {
        slog::$level!($self.log,
            $msg, $($args),*;
            "component" => crate::COMPONENT_BGP,
            "module" => crate::MOD_MANAGER,
            "unit" => UNIT_MANAGER,
            "peer" => format_args!("{}", $self.peer),
            $($key => $value),*
        )
    };
    ($self:expr, $level:ident, $msg:expr) => {
        slog::$level!($self.log,
            $msg;
            "component" => crate::COMPONENT_BGP,
            "module" => crate::MOD_MANAGER,
            "unit" => UNIT_MANAGER,
            "peer" => format_args!("{}", $self.peer),
        )
    };
    ($self:expr, $level:ident, $msg:expr, $($args:expr),*) => {
        slog::$level!($self.log,
            $msg, $($args),*;
            "component" => crate::COMPONENT_BGP,
            "module" => crate::MOD_MANAGER,
            "unit" => UNIT_MANAGER,
            "peer" => format_args!("{}", $self.peer),
        )
    };
}

pub(crate) use {fsm_log, manager_log};
