pub mod autodeploy;
pub mod configure;
pub mod deploy;
pub mod latest;
pub mod push;
