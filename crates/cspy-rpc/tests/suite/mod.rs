mod wire_client;
