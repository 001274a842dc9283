pub const TOPIC_CONTROLLER_STATE: &str = "heater/controller/state";
pub const TOPIC_CONTROLLER_SCHEDULES_STATE: &str = "heater/controller/schedules/state";

pub const TOPIC_CMD_TARGET: &str = "heater/cmnd/target";
pub const TOPIC_CMD_AUTO: &str = "heater/cmnd/auto";
pub const TOPIC_CMD_MODE: &str = "heater/cmnd/mode";
