pub mod backend;

extern crate log as glog;
