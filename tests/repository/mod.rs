mod app_scenario;
mod node_modes;
