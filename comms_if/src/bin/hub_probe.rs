//! Simple hub probe
//!
//! Connects to a controller hub, asks it for its state once and then prints every push event it
//! broadcasts. Usage: `hub_probe [invoke_endpoint] [event_endpoint]`.

use comms_if::{
    hub::{Completion, HubEvent, HubMethod, Invocation},
    net::{MonitoredSocket, SocketOptions},
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();
    let invoke_endpoint = args.get(1).map(|s| s.as_str()).unwrap_or("tcp://localhost:5132");
    let event_endpoint = args.get(2).map(|s| s.as_str()).unwrap_or("tcp://localhost:5133");

    // Create the context for zmq
    let ctx = zmq::Context::new();

    // Create the invocation socket
    let invoke_socket = match MonitoredSocket::new(
        &ctx,
        zmq::DEALER,
        SocketOptions {
            connect_timeout: 1000,
            linger: 1,
            recv_timeout: 1000,
            send_timeout: 10,
            ..Default::default()
        },
        invoke_endpoint,
    ) {
        Ok(s) => s,
        Err(e) => {
            println!("Could not connect to the hub at {}", invoke_endpoint);
            return Err(e.into());
        }
    };

    // Ask for the state
    let inv = Invocation {
        invocation_id: 0,
        target: HubMethod::GetState,
        arguments: vec![],
    };
    invoke_socket.send(&serde_json::to_string(&inv)?, 0)?;

    match invoke_socket.recv_string(0)? {
        Ok(s) => {
            let completion: Completion = serde_json::from_str(&s)?;
            println!("GetState -> {:#}", completion.result);
        }
        Err(_) => println!("Hub sent a non UTF-8 completion"),
    }

    // Subscribe to everything the hub pushes
    let event_socket = MonitoredSocket::new(
        &ctx,
        zmq::SUB,
        SocketOptions {
            block_on_first_connect: false,
            ..Default::default()
        },
        event_endpoint,
    )?;
    event_socket.set_subscribe(b"")?;

    loop {
        let msg = event_socket.recv_msg(0)?;

        match msg.as_str().map(serde_json::from_str::<HubEvent>) {
            Some(Ok(HubEvent::StateUpdate(s))) => println!(
                "State: pos {:?}, moving {}, status {:?}",
                s.joint_positions.as_array(),
                s.is_moving,
                s.status
            ),
            Some(Ok(HubEvent::StatusMessage(m))) => println!("Status: {}", m),
            Some(Ok(HubEvent::Error(e))) => println!("Error: {}", e.message),
            Some(Err(e)) => println!("Could not parse event: {}", e),
            None => println!("Received no data"),
        }
    }
}
