mod invoker;

pub use invoker::HttpInvoker;
