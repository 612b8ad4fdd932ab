// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

macro_rules! intf_log {
    ($self:expr, $level:ident, $msg:expr; $($key:expr => $value:expr),*) => {
        slog::$level!($self.log,
            $msg;
            "component" => crate::COMPONENT_OSPF,
            "module" => crate::MOD_INTERFACE,
            "unit" => UNIT_INTERFACE,
            "interface" => $self.name.as_str(),
            $($key => $value),*
        )
    };
    ($self:expr, $level:ident, $msg:expr, $($args:expr),*; $($key:expr => $value:expr),*) => {
        slog::$level!($self.log,
            $msg, $($args),*;
            "component" => crate::COMPONENT_OSPF,
            "module" => crate::MOD_INTERFACE,
            "unit" => UNIT_INTERFACE,
            "interface" => $self.name.as_str(),
            $($key => $value),*
        )
    };
    ($self:expr, $level:ident, $msg:expr) => {
        slog::$level!($self.log,
            $msg;
            "component" => crate::COMPONENT_OSPF,
            "module" => crate::MOD_INTERFACE,
            "unit" => UNIT_INTERFACE,
            "interface" => $self.name.as_str(),
        )
    };
    ($self:expr, $level:ident, $msg:expr, $($args:expr),*) => {
        slog::$level!($self.log,
            $msg, $($args),*;
            "component" => crate::COMPONENT_OSPF,
            "module" => crate::MOD_INTERFACE,
            "unit" => UNIT_INTERFACE,
            "interface" => $self.name.as_str(),
        )
    };
}

macro_rules! instance_log {
    ($log:expr, $level:ident, $msg:expr; $($key:expr => $value:expr),*) => {
        slog::$level!($log,
            $msg;
            "component" => crate::COMPONENT_OSPF,
            "module" => crate::MOD_INSTANCE,
            "unit" => UNIT_INSTANCE,
            $($key => $value),*
        )
    };
    ($log:expr, $level:ident, $msg:expr, $($args:expr),*; $($key:expr => $value:expr),*) => {
        slog::$level!($log,
            $msg, $($args),*;
            "component" => crate::COMPONENT_OSPF,
            "module" => crate::MOD_INSTANCE,
            "unit" => UNIT_INSTANCE,
            $($key => $value),*
        )
    };
}

pub(crate) use {instance_log, intf_log};
